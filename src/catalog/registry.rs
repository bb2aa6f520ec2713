//! Field registry publication.
//!
//! Snapshots every currently-APPROVED field definition into a versioned,
//! canonicalized artifact consumed by the runtime engine, following the
//! same artifact -> manifest row -> pointer ordering as ruleset publishing.

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use tracing::info;

use crate::audit;
use crate::authorization::{Permission, Principal};
use crate::canonical;
use crate::catalog::{CatalogService, FieldMeta};
use crate::database::format_ts;
use crate::database::models::{DataType, FieldRegistryManifest};
use crate::error::GovernanceError;
use crate::storage::{with_retries, ObjectStore, PutOutcome};

#[derive(Clone)]
pub struct RegistryPublisher {
    catalog: CatalogService,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl RegistryPublisher {
    pub fn new(catalog: CatalogService, store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self {
            catalog,
            store,
            prefix,
        }
    }

    fn prefixed(&self, key: String) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key,
        }
    }

    pub fn artifact_key(&self, registry_version: i64) -> String {
        self.prefixed(format!("fields/registry/v{}/fields.json", registry_version))
    }

    pub fn pointer_key(&self) -> String {
        self.prefixed("fields/registry/manifest.json".to_string())
    }

    /// Publish the next registry version.
    pub async fn publish(&self, by: &Principal) -> Result<FieldRegistryManifest, GovernanceError> {
        by.require(Permission::PublishRegistry)?;

        let db = self.catalog.database().clone();
        let mut tx = db.begin().await?;

        let mut fields = approved_field_snapshots(&mut tx).await?;
        if fields.is_empty() {
            return Err(GovernanceError::validation(
                "no approved fields to publish",
            ));
        }
        fields.sort_by_key(|f| f.field_id);

        let registry_version: i64 =
            sqlx::query_scalar("SELECT MAX(registry_version) FROM field_registry_manifests")
                .fetch_one(&mut *tx)
                .await
                .map(|v: Option<i64>| v.unwrap_or(0) + 1)?;

        let snapshot = json!({
            "registry_version": registry_version,
            "field_count": fields.len(),
            "fields": fields,
        });
        let (bytes, checksum) = canonical::canonicalize(&snapshot);

        let artifact_key = self.artifact_key(registry_version);
        let outcome =
            with_retries("registry artifact put", || self.store.put_if_absent(&artifact_key, &bytes))
                .await?;
        if outcome == PutOutcome::AlreadyExists {
            let existing = with_retries("registry read-back", || self.store.get(&artifact_key))
                .await?
                .ok_or_else(|| {
                    GovernanceError::publishing(format!(
                        "registry artifact {} vanished during publish",
                        artifact_key
                    ))
                })?;
            if canonical::checksum_of(&existing) != checksum {
                return Err(GovernanceError::publishing(format!(
                    "registry artifact {} exists with different content",
                    artifact_key
                )));
            }
        }

        let manifest = FieldRegistryManifest {
            registry_version,
            artifact_uri: self.store.uri(&artifact_key),
            checksum: checksum.clone(),
            field_count: fields.len() as i64,
            created_by: by.subject.clone(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO field_registry_manifests (registry_version, artifact_uri, checksum, \
             field_count, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(manifest.registry_version)
        .bind(&manifest.artifact_uri)
        .bind(&manifest.checksum)
        .bind(manifest.field_count)
        .bind(&manifest.created_by)
        .bind(format_ts(&manifest.created_at))
        .execute(&mut *tx)
        .await?;

        let pointer = json!({
            "schema_version": "1.0",
            "registry_version": registry_version,
            "artifact_uri": manifest.artifact_uri,
            "checksum": checksum,
            "field_count": manifest.field_count,
            "published_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        let pointer_bytes = canonical::to_canonical_bytes(&pointer);
        let pointer_key = self.pointer_key();
        with_retries("registry pointer put", || {
            self.store.put(&pointer_key, &pointer_bytes)
        })
        .await?;

        audit::record(
            &mut tx,
            "FIELD_REGISTRY",
            &registry_version.to_string(),
            "PUBLISH",
            None,
            Some(&json!({
                "registry_version": registry_version,
                "checksum": checksum,
                "field_count": manifest.field_count,
            })),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        self.catalog.invalidate().await;
        info!(registry_version, checksum = %manifest.checksum, "field registry published");
        Ok(manifest)
    }

    pub async fn latest(&self) -> Result<Option<FieldRegistryManifest>, GovernanceError> {
        let row = sqlx::query(
            "SELECT * FROM field_registry_manifests ORDER BY registry_version DESC LIMIT 1",
        )
        .fetch_optional(self.catalog.database().pool())
        .await?;
        row.as_ref().map(FieldRegistryManifest::from_row).transpose()
    }
}

/// Latest APPROVED snapshot per field key, active or not; the registry is
/// the full approved vocabulary.
async fn approved_field_snapshots(
    conn: &mut sqlx::SqliteConnection,
) -> Result<Vec<FieldMeta>, GovernanceError> {
    let rows = sqlx::query(
        "SELECT fv.field_key, fv.version, fv.display_name, fv.data_type, fv.allowed_operators, \
                fv.multi_value_allowed, fv.is_sensitive, f.field_id, \
                (SELECT meta_value FROM rule_field_metadata m \
                 WHERE m.field_key = fv.field_key AND m.meta_key = 'enum_values') AS enum_values \
         FROM rule_field_versions fv \
         JOIN rule_fields f ON f.field_key = fv.field_key \
         WHERE fv.status = 'APPROVED' \
           AND fv.version = (SELECT MAX(v2.version) FROM rule_field_versions v2 \
                             WHERE v2.field_key = fv.field_key AND v2.status = 'APPROVED')",
    )
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| {
            let enum_values: Option<String> = row.try_get("enum_values")?;
            Ok(FieldMeta {
                field_key: row.try_get("field_key")?,
                field_id: row.try_get("field_id")?,
                display_name: row.try_get("display_name")?,
                data_type: DataType::parse(row.try_get::<String, _>("data_type")?.as_str())?,
                allowed_operators: serde_json::from_str(
                    row.try_get::<String, _>("allowed_operators")?.as_str(),
                )?,
                multi_value_allowed: row.try_get("multi_value_allowed")?,
                is_sensitive: row.try_get("is_sensitive")?,
                version: row.try_get("version")?,
                enum_values: enum_values
                    .map(|raw| serde_json::from_str(&raw))
                    .transpose()?,
            })
        })
        .collect()
}
