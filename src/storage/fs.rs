//! Filesystem object store for local development and tests.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::GovernanceError;
use crate::storage::{ObjectStore, PutOutcome};

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, GovernanceError> {
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(GovernanceError::validation(format!(
                "invalid object key: {}",
                key
            )));
        }
        Ok(self.root.join(key))
    }

    async fn prepare_parent(&self, path: &Path) -> Result<(), GovernanceError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GovernanceError::unavailable(format!("mkdir failed: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, GovernanceError> {
        let path = self.resolve(key)?;
        self.prepare_parent(&path).await?;

        let open = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match open {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(bytes)
                    .await
                    .map_err(|e| GovernanceError::unavailable(format!("write failed: {}", e)))?;
                file.sync_all()
                    .await
                    .map_err(|e| GovernanceError::unavailable(format!("sync failed: {}", e)))?;
                Ok(PutOutcome::Created)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(PutOutcome::AlreadyExists),
            Err(e) => Err(GovernanceError::unavailable(format!(
                "object write failed: {}",
                e
            ))),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), GovernanceError> {
        let path = self.resolve(key)?;
        self.prepare_parent(&path).await?;

        // Write-then-rename keeps readers from observing a torn pointer.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| GovernanceError::unavailable(format!("write failed: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| GovernanceError::unavailable(format!("rename failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GovernanceError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GovernanceError::unavailable(format!(
                "object read failed: {}",
                e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, GovernanceError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| GovernanceError::unavailable(format!("stat failed: {}", e)))?)
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}
