//! Artifact publisher.
//!
//! Runs inside the approval transaction: compile, write the immutable
//! versioned artifact, insert the manifest row, then move the mutable
//! pointer. A database failure therefore leaves at most a content-addressed
//! artifact behind, and the pointer never advances ahead of its manifest
//! row.

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::canonical;
use crate::catalog::FieldMeta;
use crate::compiler;
use crate::database::format_ts;
use crate::database::models::{Ruleset, RulesetManifest, RulesetVersion};
use crate::error::GovernanceError;
use crate::ids;
use crate::storage::{with_retries, ObjectStore, PutOutcome};

pub const POINTER_SCHEMA_VERSION: &str = "1.0";

#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self { store, prefix }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn prefixed(&self, key: String) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key,
        }
    }

    pub fn artifact_key(&self, ruleset: &Ruleset, ruleset_key: &str, version: i64) -> String {
        self.prefixed(format!(
            "rulesets/{}/{}/{}/{}/v{}/ruleset.json",
            ruleset.environment, ruleset.region, ruleset.country, ruleset_key, version
        ))
    }

    pub fn pointer_key(&self, ruleset: &Ruleset, ruleset_key: &str) -> String {
        self.prefixed(format!(
            "rulesets/{}/{}/{}/{}/manifest.json",
            ruleset.environment, ruleset.region, ruleset.country, ruleset_key
        ))
    }

    /// Publish a compiled ruleset version on the caller's transaction.
    ///
    /// Order is locked: (1) immutable artifact, (2) manifest row on the
    /// transaction, (3) mutable pointer. Callers abort the surrounding
    /// approval when this returns an error.
    pub async fn publish(
        &self,
        conn: &mut SqliteConnection,
        catalog: &HashMap<String, FieldMeta>,
        ruleset: &Ruleset,
        version: &RulesetVersion,
        actor: &str,
    ) -> Result<RulesetManifest, GovernanceError> {
        let ruleset_key = ruleset.rule_type.ruleset_key().ok_or_else(|| {
            GovernanceError::validation_with(
                "governance-only rule types cannot be published",
                json!({
                    "ruleset_id": ruleset.ruleset_id,
                    "rule_type": ruleset.rule_type.as_str(),
                }),
            )
        })?;

        let artifact = compiler::compile(conn, catalog, &version.ruleset_version_id).await?;

        let artifact_key = self.artifact_key(ruleset, ruleset_key, version.version);
        let outcome = with_retries("artifact put", || {
            self.store.put_if_absent(&artifact_key, &artifact.bytes)
        })
        .await?;
        if outcome == PutOutcome::AlreadyExists {
            // Content-addressed: an identical artifact is a no-op, anything
            // else means the key space was corrupted.
            let existing = with_retries("artifact read-back", || self.store.get(&artifact_key))
                .await?
                .ok_or_else(|| {
                    GovernanceError::publishing(format!(
                        "artifact {} vanished during publish",
                        artifact_key
                    ))
                })?;
            let existing_checksum = canonical::checksum_of(&existing);
            if existing_checksum != artifact.checksum {
                return Err(GovernanceError::Publishing {
                    message: format!("artifact {} exists with different content", artifact_key),
                    details: Some(json!({
                        "existing_checksum": existing_checksum,
                        "computed_checksum": artifact.checksum,
                    })),
                });
            }
        }

        let artifact_uri = self.store.uri(&artifact_key);
        let field_registry_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(registry_version) FROM field_registry_manifests")
                .fetch_one(&mut *conn)
                .await?;

        let manifest = RulesetManifest {
            manifest_id: ids::generate(),
            environment: ruleset.environment.clone(),
            region: ruleset.region.clone(),
            country: ruleset.country.clone(),
            rule_type: ruleset.rule_type,
            ruleset_version: version.version,
            ruleset_version_id: version.ruleset_version_id.clone(),
            field_registry_version,
            artifact_uri: artifact_uri.clone(),
            checksum: artifact.checksum.clone(),
            created_by: actor.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO ruleset_manifests (manifest_id, environment, region, country, rule_type, \
             ruleset_version, ruleset_version_id, field_registry_version, artifact_uri, checksum, \
             created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&manifest.manifest_id)
        .bind(&manifest.environment)
        .bind(&manifest.region)
        .bind(&manifest.country)
        .bind(manifest.rule_type.as_str())
        .bind(manifest.ruleset_version)
        .bind(&manifest.ruleset_version_id)
        .bind(manifest.field_registry_version)
        .bind(&manifest.artifact_uri)
        .bind(&manifest.checksum)
        .bind(&manifest.created_by)
        .bind(format_ts(&manifest.created_at))
        .execute(&mut *conn)
        .await?;

        let pointer = json!({
            "schema_version": POINTER_SCHEMA_VERSION,
            "environment": ruleset.environment,
            "region": ruleset.region,
            "country": ruleset.country,
            "ruleset_key": ruleset_key,
            "ruleset_version": version.version,
            "artifact_uri": artifact_uri,
            "checksum": artifact.checksum,
            "published_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        let pointer_bytes = canonical::to_canonical_bytes(&pointer);
        let pointer_key = self.pointer_key(ruleset, ruleset_key);
        with_retries("pointer put", || self.store.put(&pointer_key, &pointer_bytes)).await?;

        info!(
            ruleset_id = %ruleset.ruleset_id,
            version = version.version,
            checksum = %manifest.checksum,
            artifact = %artifact_key,
            "ruleset published"
        );
        Ok(manifest)
    }

    /// Keyset-paginated manifest history, optionally narrowed to one
    /// environment and rule type.
    pub async fn list_manifests(
        &self,
        conn: &mut SqliteConnection,
        environment: Option<&str>,
        rule_type: Option<&str>,
        request: &crate::pagination::PageRequest,
    ) -> Result<crate::pagination::Page<RulesetManifest>, GovernanceError> {
        let mut sql = String::from("SELECT * FROM ruleset_manifests WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(environment) = environment {
            sql.push_str(" AND environment = ?");
            binds.push(environment.to_string());
        }
        if let Some(rule_type) = rule_type {
            sql.push_str(" AND rule_type = ?");
            binds.push(rule_type.to_string());
        }
        crate::rules::push_keyset_clause(&mut sql, &mut binds, request, "manifest_id");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(request.limit + 1);

        let rows = q.fetch_all(&mut *conn).await?;
        let manifests = rows
            .iter()
            .map(RulesetManifest::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(crate::pagination::assemble(manifests, request, |m| {
            crate::pagination::Cursor::new(m.manifest_id.clone(), m.created_at)
        }))
    }

    /// Most recent manifest row for a ruleset coordinate.
    pub async fn latest_manifest(
        &self,
        conn: &mut SqliteConnection,
        environment: &str,
        region: &str,
        country: &str,
        rule_type: &str,
    ) -> Result<Option<RulesetManifest>, GovernanceError> {
        let row = sqlx::query(
            "SELECT * FROM ruleset_manifests \
             WHERE environment = ? AND region = ? AND country = ? AND rule_type = ? \
             ORDER BY ruleset_version DESC LIMIT 1",
        )
        .bind(environment)
        .bind(region)
        .bind(country)
        .bind(rule_type)
        .fetch_optional(conn)
        .await?;
        row.as_ref().map(RulesetManifest::from_row).transpose()
    }
}
