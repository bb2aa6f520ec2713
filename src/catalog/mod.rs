//! Field catalog.
//!
//! Governs the identities and versioned definitions of the fields that
//! condition trees may reference, and publishes the versioned field
//! registry consumed by the runtime engine.

pub mod registry;
pub mod standard;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Row, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::audit;
use crate::authorization::{Permission, Principal};
use crate::database::models::{DataType, Operator, RuleField, RuleFieldVersion, VersionStatus};
use crate::database::{format_ts, Database};
use crate::error::GovernanceError;
use crate::ids;

/// Smallest field id available to custom fields; 1..26 are reserved.
pub const FIRST_CUSTOM_FIELD_ID: i64 = 27;

/// Active-catalog view of one field, the shape condition validation and
/// the published registry both consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    pub field_key: String,
    pub field_id: i64,
    pub display_name: String,
    pub data_type: DataType,
    pub allowed_operators: Vec<Operator>,
    pub multi_value_allowed: bool,
    pub is_sensitive: bool,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

/// Catalog reads are hot (every rule-version validation); the active
/// snapshot is cached in-process and invalidated on field approval and
/// registry publication.
#[derive(Clone)]
pub struct CatalogService {
    db: Database,
    cache: Arc<RwLock<Option<Arc<HashMap<String, FieldMeta>>>>>,
}

/// Attributes for a new field or field version.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub display_name: String,
    pub description: String,
    pub data_type: DataType,
    pub allowed_operators: Vec<Operator>,
    pub multi_value_allowed: bool,
    pub is_sensitive: bool,
    pub enum_values: Option<Vec<String>>,
}

impl CatalogService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Latest APPROVED snapshot per active field key.
    pub async fn get_active_catalog(
        &self,
    ) -> Result<Arc<HashMap<String, FieldMeta>>, GovernanceError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(cached.clone());
        }
        let loaded = Arc::new(self.load_catalog().await?);
        *self.cache.write().await = Some(loaded.clone());
        Ok(loaded)
    }

    /// Drop the cached snapshot; the next read reloads from the store.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn load_catalog(&self) -> Result<HashMap<String, FieldMeta>, GovernanceError> {
        let rows = sqlx::query(
            "SELECT fv.field_key, fv.version, fv.display_name, fv.data_type, \
                    fv.allowed_operators, fv.multi_value_allowed, fv.is_sensitive, f.field_id \
             FROM rule_field_versions fv \
             JOIN rule_fields f ON f.field_key = fv.field_key \
             WHERE f.is_active = 1 AND fv.status = 'APPROVED' \
               AND fv.version = (SELECT MAX(v2.version) FROM rule_field_versions v2 \
                                 WHERE v2.field_key = fv.field_key AND v2.status = 'APPROVED')",
        )
        .fetch_all(self.db.pool())
        .await?;

        let enum_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT field_key, meta_value FROM rule_field_metadata WHERE meta_key = 'enum_values'",
        )
        .fetch_all(self.db.pool())
        .await?;
        let mut enum_sets: HashMap<String, Vec<String>> = HashMap::new();
        for (field_key, raw) in enum_rows {
            enum_sets.insert(field_key, serde_json::from_str(&raw)?);
        }

        let mut catalog = HashMap::new();
        for row in &rows {
            let field_key: String = row.try_get("field_key")?;
            let meta = FieldMeta {
                field_id: row.try_get("field_id")?,
                display_name: row.try_get("display_name")?,
                data_type: DataType::parse(row.try_get::<String, _>("data_type")?.as_str())?,
                allowed_operators: serde_json::from_str(
                    row.try_get::<String, _>("allowed_operators")?.as_str(),
                )?,
                multi_value_allowed: row.try_get("multi_value_allowed")?,
                is_sensitive: row.try_get("is_sensitive")?,
                version: row.try_get("version")?,
                enum_values: enum_sets.remove(&field_key),
                field_key: field_key.clone(),
            };
            catalog.insert(field_key, meta);
        }
        Ok(catalog)
    }

    /// First unused field id at or above [`FIRST_CUSTOM_FIELD_ID`].
    pub async fn next_field_id(&self) -> Result<i64, GovernanceError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(field_id) FROM rule_fields")
            .fetch_one(self.db.pool())
            .await?;
        Ok(max.unwrap_or(0).max(FIRST_CUSTOM_FIELD_ID - 1) + 1)
    }

    pub async fn get_field(&self, field_key: &str) -> Result<RuleField, GovernanceError> {
        let row = sqlx::query("SELECT * FROM rule_fields WHERE field_key = ?")
            .bind(field_key)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| {
                GovernanceError::not_found(format!("field not found: {}", field_key))
            })?;
        RuleField::from_row(&row)
    }

    pub async fn list_fields(&self) -> Result<Vec<RuleField>, GovernanceError> {
        let rows = sqlx::query("SELECT * FROM rule_fields ORDER BY field_id")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(RuleField::from_row).collect()
    }

    /// Create a new field identity with a DRAFT first version.
    pub async fn create_field(
        &self,
        field_key: &str,
        spec: FieldSpec,
        by: &Principal,
    ) -> Result<RuleFieldVersion, GovernanceError> {
        by.require(Permission::ManageFields)?;
        validate_field_key(field_key)?;
        validate_field_spec(&spec)?;

        let mut tx = self.db.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT field_key FROM rule_fields WHERE field_key = ?")
                .bind(field_key)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(GovernanceError::conflict_with(
                format!("field already exists: {}", field_key),
                json!({"field_key": field_key}),
            ));
        }

        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(field_id) FROM rule_fields")
            .fetch_one(&mut *tx)
            .await?;
        let field_id = max.unwrap_or(0).max(FIRST_CUSTOM_FIELD_ID - 1) + 1;

        let now = Utc::now();
        let operators_json = serde_json::to_string(&spec.allowed_operators)?;

        sqlx::query(
            "INSERT INTO rule_fields (field_key, field_id, display_name, description, data_type, \
             allowed_operators, multi_value_allowed, is_sensitive, is_active, current_version, \
             row_version, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 1, 1, ?, ?, ?)",
        )
        .bind(field_key)
        .bind(field_id)
        .bind(&spec.display_name)
        .bind(&spec.description)
        .bind(spec.data_type.as_str())
        .bind(&operators_json)
        .bind(spec.multi_value_allowed)
        .bind(spec.is_sensitive)
        .bind(&by.subject)
        .bind(format_ts(&now))
        .bind(format_ts(&now))
        .execute(&mut *tx)
        .await?;

        let field_version_id = ids::generate();
        sqlx::query(
            "INSERT INTO rule_field_versions (field_version_id, field_key, version, display_name, \
             description, data_type, allowed_operators, multi_value_allowed, is_sensitive, status, \
             created_by, created_at) \
             VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, 'DRAFT', ?, ?)",
        )
        .bind(&field_version_id)
        .bind(field_key)
        .bind(&spec.display_name)
        .bind(&spec.description)
        .bind(spec.data_type.as_str())
        .bind(&operators_json)
        .bind(spec.multi_value_allowed)
        .bind(spec.is_sensitive)
        .bind(&by.subject)
        .bind(format_ts(&now))
        .execute(&mut *tx)
        .await?;

        if let Some(values) = &spec.enum_values {
            set_metadata_on(
                &mut tx,
                field_key,
                "enum_values",
                &serde_json::to_value(values)?,
                "Permitted values for this enum field",
            )
            .await?;
        }

        let version = load_field_version(&mut tx, &field_version_id).await?;
        audit::record(
            &mut tx,
            "FIELD_VERSION",
            &field_version_id,
            "CREATE",
            None,
            Some(&serde_json::to_value(&version)?),
            &by.subject,
        )
        .await?;

        tx.commit().await?;
        info!(field_key, field_id, "field created");
        Ok(version)
    }

    /// Draft a new version of an existing field.
    pub async fn update_field(
        &self,
        field_key: &str,
        spec: FieldSpec,
        expected_row_version: Option<i64>,
        by: &Principal,
    ) -> Result<RuleFieldVersion, GovernanceError> {
        by.require(Permission::ManageFields)?;
        validate_field_spec(&spec)?;

        let mut tx = self.db.begin().await?;

        let field_row = sqlx::query("SELECT * FROM rule_fields WHERE field_key = ?")
            .bind(field_key)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                GovernanceError::not_found(format!("field not found: {}", field_key))
            })?;
        let field = RuleField::from_row(&field_row)?;

        if let Some(expected) = expected_row_version {
            if expected != field.row_version {
                return Err(GovernanceError::conflict_with(
                    "field was modified concurrently",
                    json!({"expected": expected, "actual": field.row_version}),
                ));
            }
        }
        if field.field_id < FIRST_CUSTOM_FIELD_ID && spec.data_type != field.data_type {
            return Err(GovernanceError::validation_with(
                "standard field data type is immutable",
                json!({"field_key": field_key}),
            ));
        }

        let next: i64 =
            sqlx::query_scalar("SELECT MAX(version) FROM rule_field_versions WHERE field_key = ?")
                .bind(field_key)
                .fetch_one(&mut *tx)
                .await
                .map(|v: Option<i64>| v.unwrap_or(0) + 1)?;

        let now = Utc::now();
        let field_version_id = ids::generate();
        sqlx::query(
            "INSERT INTO rule_field_versions (field_version_id, field_key, version, display_name, \
             description, data_type, allowed_operators, multi_value_allowed, is_sensitive, status, \
             created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'DRAFT', ?, ?)",
        )
        .bind(&field_version_id)
        .bind(field_key)
        .bind(next)
        .bind(&spec.display_name)
        .bind(&spec.description)
        .bind(spec.data_type.as_str())
        .bind(serde_json::to_string(&spec.allowed_operators)?)
        .bind(spec.multi_value_allowed)
        .bind(spec.is_sensitive)
        .bind(&by.subject)
        .bind(format_ts(&now))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE rule_fields SET row_version = row_version + 1, updated_at = ? WHERE field_key = ?",
        )
        .bind(format_ts(&now))
        .bind(field_key)
        .execute(&mut *tx)
        .await?;

        if let Some(values) = &spec.enum_values {
            set_metadata_on(
                &mut tx,
                field_key,
                "enum_values",
                &serde_json::to_value(values)?,
                "Permitted values for this enum field",
            )
            .await?;
        }

        let version = load_field_version(&mut tx, &field_version_id).await?;
        audit::record(
            &mut tx,
            "FIELD_VERSION",
            &field_version_id,
            "CREATE",
            None,
            Some(&serde_json::to_value(&version)?),
            &by.subject,
        )
        .await?;

        tx.commit().await?;
        Ok(version)
    }

    pub async fn set_field_metadata(
        &self,
        field_key: &str,
        meta_key: &str,
        meta_value: &serde_json::Value,
        description: &str,
        by: &Principal,
    ) -> Result<(), GovernanceError> {
        by.require(Permission::ManageFields)?;
        let mut tx = self.db.begin().await?;
        // Existence check keeps metadata from dangling.
        let exists: Option<String> =
            sqlx::query_scalar("SELECT field_key FROM rule_fields WHERE field_key = ?")
                .bind(field_key)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(GovernanceError::not_found(format!(
                "field not found: {}",
                field_key
            )));
        }
        set_metadata_on(&mut tx, field_key, meta_key, meta_value, description).await?;
        audit::record(
            &mut tx,
            "FIELD",
            field_key,
            "SET_METADATA",
            None,
            Some(&json!({"meta_key": meta_key, "meta_value": meta_value})),
            &by.subject,
        )
        .await?;
        tx.commit().await?;
        self.invalidate().await;
        Ok(())
    }

    /// Install the standard fields (ids 1..26). Idempotent.
    pub async fn seed_standard_fields(&self, by: &str) -> Result<usize, GovernanceError> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now();
        let mut inserted = 0usize;

        for field in standard::standard_fields() {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT field_key FROM rule_fields WHERE field_key = ?")
                    .bind(field.field_key)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_some() {
                continue;
            }

            let operators_json = serde_json::to_string(&field.allowed_operators.to_vec())?;
            sqlx::query(
                "INSERT INTO rule_fields (field_key, field_id, display_name, description, data_type, \
                 allowed_operators, multi_value_allowed, is_sensitive, is_active, current_version, \
                 row_version, created_by, created_at, updated_at) \
                 VALUES (?, ?, ?, '', ?, ?, ?, ?, 1, 1, 1, ?, ?, ?)",
            )
            .bind(field.field_key)
            .bind(field.field_id)
            .bind(field.display_name)
            .bind(field.data_type.as_str())
            .bind(&operators_json)
            .bind(field.multi_value_allowed)
            .bind(field.is_sensitive)
            .bind(by)
            .bind(format_ts(&now))
            .bind(format_ts(&now))
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO rule_field_versions (field_version_id, field_key, version, display_name, \
                 description, data_type, allowed_operators, multi_value_allowed, is_sensitive, status, \
                 created_by, created_at, approved_by, approved_at) \
                 VALUES (?, ?, 1, ?, '', ?, ?, ?, ?, 'APPROVED', ?, ?, ?, ?)",
            )
            .bind(ids::generate())
            .bind(field.field_key)
            .bind(field.display_name)
            .bind(field.data_type.as_str())
            .bind(&operators_json)
            .bind(field.multi_value_allowed)
            .bind(field.is_sensitive)
            .bind(by)
            .bind(format_ts(&now))
            .bind(by)
            .bind(format_ts(&now))
            .execute(&mut *tx)
            .await?;

            if let Some(values) = field.enum_values {
                set_metadata_on(
                    &mut tx,
                    field.field_key,
                    "enum_values",
                    &serde_json::to_value(values)?,
                    "Permitted values for this enum field",
                )
                .await?;
            }
            inserted += 1;
        }

        tx.commit().await?;
        if inserted > 0 {
            self.invalidate().await;
            info!(count = inserted, "standard fields seeded");
        }
        Ok(inserted)
    }
}

fn validate_field_key(field_key: &str) -> Result<(), GovernanceError> {
    let re = regex::Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("static regex");
    if re.is_match(field_key) {
        Ok(())
    } else {
        Err(GovernanceError::validation_with(
            "field key must be snake_case ascii",
            json!({"field_key": field_key}),
        ))
    }
}

fn validate_field_spec(spec: &FieldSpec) -> Result<(), GovernanceError> {
    if spec.display_name.trim().is_empty() {
        return Err(GovernanceError::validation("display name is required"));
    }
    if spec.allowed_operators.is_empty() {
        return Err(GovernanceError::validation(
            "at least one operator must be allowed",
        ));
    }
    if spec.data_type == DataType::Enum
        && spec.enum_values.as_ref().map_or(true, |v| v.is_empty())
    {
        return Err(GovernanceError::validation(
            "enum fields require a non-empty value set",
        ));
    }
    Ok(())
}

async fn set_metadata_on(
    conn: &mut SqliteConnection,
    field_key: &str,
    meta_key: &str,
    meta_value: &serde_json::Value,
    description: &str,
) -> Result<(), GovernanceError> {
    sqlx::query(
        "INSERT INTO rule_field_metadata (field_key, meta_key, meta_value, description) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (field_key, meta_key) DO UPDATE SET \
             meta_value = excluded.meta_value, description = excluded.description",
    )
    .bind(field_key)
    .bind(meta_key)
    .bind(serde_json::to_string(meta_value)?)
    .bind(description)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn load_field_version(
    conn: &mut SqliteConnection,
    field_version_id: &str,
) -> Result<RuleFieldVersion, GovernanceError> {
    let row = sqlx::query("SELECT * FROM rule_field_versions WHERE field_version_id = ?")
        .bind(field_version_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| {
            GovernanceError::not_found(format!("field version not found: {}", field_version_id))
        })?;
    RuleFieldVersion::from_row(&row)
}

pub(crate) async fn set_field_version_status(
    conn: &mut SqliteConnection,
    field_version_id: &str,
    status: VersionStatus,
    decided_by: Option<&str>,
) -> Result<(), GovernanceError> {
    let now = format_ts(&Utc::now());
    match decided_by {
        Some(actor) => {
            sqlx::query(
                "UPDATE rule_field_versions SET status = ?, approved_by = ?, approved_at = ? \
                 WHERE field_version_id = ?",
            )
            .bind(status.as_str())
            .bind(actor)
            .bind(&now)
            .bind(field_version_id)
            .execute(conn)
            .await?;
        }
        None => {
            sqlx::query("UPDATE rule_field_versions SET status = ? WHERE field_version_id = ?")
                .bind(status.as_str())
                .bind(field_version_id)
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

/// After a version approval: supersede older APPROVED versions, sync the
/// identity row to the newly approved snapshot, and activate the field.
pub(crate) async fn apply_field_version_approval(
    conn: &mut SqliteConnection,
    version: &RuleFieldVersion,
) -> Result<(), GovernanceError> {
    sqlx::query(
        "UPDATE rule_field_versions SET status = 'SUPERSEDED' \
         WHERE field_key = ? AND status = 'APPROVED' AND field_version_id <> ?",
    )
    .bind(&version.field_key)
    .bind(&version.field_version_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE rule_fields SET display_name = ?, description = ?, data_type = ?, \
         allowed_operators = ?, multi_value_allowed = ?, is_sensitive = ?, is_active = 1, \
         current_version = ?, row_version = row_version + 1, updated_at = ? \
         WHERE field_key = ?",
    )
    .bind(&version.display_name)
    .bind(&version.description)
    .bind(version.data_type.as_str())
    .bind(serde_json::to_string(&version.allowed_operators)?)
    .bind(version.multi_value_allowed)
    .bind(version.is_sensitive)
    .bind(version.version)
    .bind(format_ts(&Utc::now()))
    .bind(&version.field_key)
    .execute(conn)
    .await?;
    Ok(())
}
