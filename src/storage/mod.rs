//! Object storage.
//!
//! Compiled artifacts and manifest pointers live behind one trait with two
//! backends: a filesystem root for local development and an S3-compatible
//! endpoint for deployments. The backend is chosen from configuration at
//! startup, never at compile time.

pub mod fs;
pub mod s3;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::StorageSettings;
use crate::error::GovernanceError;

/// Outcome of a conditional (immutable) put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an immutable object; fails softly when the key already exists.
    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, GovernanceError>;

    /// Unconditional write, used only for mutable pointer objects.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), GovernanceError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GovernanceError>;

    async fn exists(&self, key: &str) -> Result<bool, GovernanceError>;

    /// Fully qualified URI recorded in manifests.
    fn uri(&self, key: &str) -> String;
}

/// Build the configured backend.
pub fn build_store(settings: &StorageSettings) -> Result<Arc<dyn ObjectStore>, GovernanceError> {
    match settings.backend.as_str() {
        "filesystem" => Ok(Arc::new(fs::FsStore::new(&settings.root))),
        "s3" => Ok(Arc::new(s3::S3Store::new(settings)?)),
        other => Err(GovernanceError::validation(format!(
            "unknown storage backend: {}",
            other
        ))),
    }
}

const MAX_ATTEMPTS: u32 = 3;

/// Retry a transient-failing storage call with exponential backoff.
///
/// Non-transient errors surface immediately; transient errors that outlast
/// the attempts become `PublishingError`.
pub async fn with_retries<T, F, Fut>(operation: &str, mut call: F) -> Result<T, GovernanceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GovernanceError>>,
{
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(operation, attempt, error = %err, "storage call failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(GovernanceError::publishing(format!(
                    "{} failed after {} attempts: {}",
                    operation, MAX_ATTEMPTS, err
                )));
            }
            Err(err) => return Err(err),
        }
    }
}
