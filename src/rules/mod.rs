//! Rule identities and immutable rule versions.

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::info;

use crate::audit;
use crate::authorization::{Permission, Principal};
use crate::catalog::CatalogService;
use crate::condition::{validate::validate_tree, ConditionNode};
use crate::database::models::{Rule, RuleAction, RuleType, RuleVersion, VersionStatus};
use crate::database::{format_ts, Database};
use crate::error::GovernanceError;
use crate::ids;
use crate::pagination::{self, Cursor, Direction, Page, PageRequest};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 1000;

/// Dimensions a rule-version scope may constrain.
const SCOPE_DIMENSIONS: &[&str] = &["network", "mcc", "bin", "country", "merchant_id"];

#[derive(Debug, Clone, Default)]
pub struct RuleFilters {
    pub rule_type: Option<RuleType>,
    pub status: Option<VersionStatus>,
}

#[derive(Clone)]
pub struct RuleService {
    db: Database,
    catalog: CatalogService,
}

impl RuleService {
    pub fn new(db: Database, catalog: CatalogService) -> Self {
        Self { db, catalog }
    }

    /// Create a rule identity in DRAFT.
    pub async fn create_rule(
        &self,
        rule_name: &str,
        description: &str,
        rule_type: RuleType,
        by: &Principal,
    ) -> Result<Rule, GovernanceError> {
        by.require(Permission::AuthorRules)?;
        if rule_name.trim().is_empty() {
            return Err(GovernanceError::validation("rule name is required"));
        }

        let rule = Rule {
            rule_id: ids::generate(),
            rule_name: rule_name.to_string(),
            description: description.to_string(),
            rule_type,
            status: VersionStatus::Draft,
            current_version: 1,
            row_version: 1,
            created_by: by.subject.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO rules (rule_id, rule_name, description, rule_type, status, \
             current_version, row_version, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.rule_id)
        .bind(&rule.rule_name)
        .bind(&rule.description)
        .bind(rule.rule_type.as_str())
        .bind(rule.status.as_str())
        .bind(rule.current_version)
        .bind(rule.row_version)
        .bind(&rule.created_by)
        .bind(format_ts(&rule.created_at))
        .bind(format_ts(&rule.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            "RULE",
            &rule.rule_id,
            "CREATE",
            None,
            Some(&serde_json::to_value(&rule)?),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        info!(rule_id = %rule.rule_id, rule_type = rule.rule_type.as_str(), "rule created");
        Ok(rule)
    }

    /// Create the next immutable version of a rule, in DRAFT.
    ///
    /// The condition tree is validated against the active catalog before
    /// anything is written. `expected_row_version` is the optimistic lock
    /// on the identity row.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_rule_version(
        &self,
        rule_id: &str,
        condition_tree: &Value,
        scope: &Value,
        priority: i64,
        action: RuleAction,
        expected_row_version: Option<i64>,
        by: &Principal,
    ) -> Result<RuleVersion, GovernanceError> {
        by.require(Permission::AuthorRules)?;

        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(GovernanceError::validation_with(
                "priority out of range",
                json!({"priority": priority, "min": MIN_PRIORITY, "max": MAX_PRIORITY}),
            ));
        }
        validate_scope(scope)?;

        let tree = ConditionNode::parse(condition_tree)?;
        let catalog = self.catalog.get_active_catalog().await?;
        validate_tree(&tree, &catalog)?;

        let mut tx = self.db.begin().await?;
        let rule = load_rule(&mut tx, rule_id).await?;

        if let Some(expected) = expected_row_version {
            if expected != rule.row_version {
                return Err(GovernanceError::conflict_with(
                    "rule was modified concurrently",
                    json!({"rule_id": rule_id, "expected": expected, "actual": rule.row_version}),
                ));
            }
        }

        let next: i64 =
            sqlx::query_scalar("SELECT MAX(version) FROM rule_versions WHERE rule_id = ?")
                .bind(rule_id)
                .fetch_one(&mut *tx)
                .await
                .map(|v: Option<i64>| v.unwrap_or(0) + 1)?;

        let version = RuleVersion {
            rule_version_id: ids::generate(),
            rule_id: rule_id.to_string(),
            version: next,
            // Stored in normalized keyword form regardless of input shape.
            condition_tree: tree.to_wire(),
            scope: scope.clone(),
            priority,
            action,
            status: VersionStatus::Draft,
            created_by: by.subject.clone(),
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
        };

        sqlx::query(
            "INSERT INTO rule_versions (rule_version_id, rule_id, version, condition_tree, scope, \
             priority, action, status, created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.rule_version_id)
        .bind(&version.rule_id)
        .bind(version.version)
        .bind(version.condition_tree.to_string())
        .bind(version.scope.to_string())
        .bind(version.priority)
        .bind(version.action.as_str())
        .bind(version.status.as_str())
        .bind(&version.created_by)
        .bind(format_ts(&version.created_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE rules SET row_version = row_version + 1, updated_at = ? WHERE rule_id = ?",
        )
        .bind(format_ts(&Utc::now()))
        .bind(rule_id)
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            "RULE_VERSION",
            &version.rule_version_id,
            "CREATE",
            None,
            Some(&serde_json::to_value(&version)?),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        Ok(version)
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<Rule, GovernanceError> {
        let mut conn = self.db.pool().acquire().await?;
        load_rule(&mut conn, rule_id).await
    }

    pub async fn get_rule_version(
        &self,
        rule_version_id: &str,
    ) -> Result<RuleVersion, GovernanceError> {
        let mut conn = self.db.pool().acquire().await?;
        load_rule_version(&mut conn, rule_version_id).await
    }

    pub async fn list_rules(
        &self,
        filters: &RuleFilters,
        request: &PageRequest,
    ) -> Result<Page<Rule>, GovernanceError> {
        let mut sql = String::from("SELECT * FROM rules WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(rule_type) = filters.rule_type {
            sql.push_str(" AND rule_type = ?");
            binds.push(rule_type.as_str().to_string());
        }
        if let Some(status) = filters.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        push_keyset_clause(&mut sql, &mut binds, request, "rule_id");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(request.limit + 1);

        let rows = q.fetch_all(self.db.pool()).await?;
        let rules = rows.iter().map(Rule::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(pagination::assemble(rules, request, |rule| {
            Cursor::new(rule.rule_id.clone(), rule.created_at)
        }))
    }

    pub async fn list_rule_versions(
        &self,
        rule_id: &str,
        status: Option<VersionStatus>,
        request: &PageRequest,
    ) -> Result<Page<RuleVersion>, GovernanceError> {
        let mut sql = String::from("SELECT * FROM rule_versions WHERE rule_id = ?");
        let mut binds: Vec<String> = vec![rule_id.to_string()];

        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        push_keyset_clause(&mut sql, &mut binds, request, "rule_version_id");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(request.limit + 1);

        let rows = q.fetch_all(self.db.pool()).await?;
        let versions = rows
            .iter()
            .map(RuleVersion::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pagination::assemble(versions, request, |v| {
            Cursor::new(v.rule_version_id.clone(), v.created_at)
        }))
    }
}

/// Scope objects map dimension names to non-empty string lists; an empty
/// object means universal scope.
pub fn validate_scope(scope: &Value) -> Result<(), GovernanceError> {
    let map = scope.as_object().ok_or_else(|| {
        GovernanceError::validation("scope must be a JSON object")
    })?;
    for (dimension, values) in map {
        if !SCOPE_DIMENSIONS.contains(&dimension.as_str()) {
            return Err(GovernanceError::validation_with(
                "unknown scope dimension",
                json!({"dimension": dimension, "known": SCOPE_DIMENSIONS}),
            ));
        }
        let list = values.as_array().ok_or_else(|| {
            GovernanceError::validation_with(
                "scope dimension must be a list of strings",
                json!({"dimension": dimension}),
            )
        })?;
        if list.is_empty() || !list.iter().all(|v| v.as_str().map_or(false, |s| !s.is_empty())) {
            return Err(GovernanceError::validation_with(
                "scope dimension must be a non-empty list of non-empty strings",
                json!({"dimension": dimension}),
            ));
        }
    }
    Ok(())
}

/// Append the keyset WHERE/ORDER/LIMIT suffix shared by list queries.
pub(crate) fn push_keyset_clause(
    sql: &mut String,
    binds: &mut Vec<String>,
    request: &PageRequest,
    id_column: &str,
) {
    if let Some(cursor) = &request.cursor {
        match request.direction {
            Direction::Next => sql.push_str(&format!(
                " AND (created_at < ? OR (created_at = ? AND {} < ?))",
                id_column
            )),
            Direction::Prev => sql.push_str(&format!(
                " AND (created_at > ? OR (created_at = ? AND {} > ?))",
                id_column
            )),
        }
        let ts = format_ts(&cursor.created_at);
        binds.push(ts.clone());
        binds.push(ts);
        binds.push(cursor.id.clone());
    }
    match request.direction {
        Direction::Next => sql.push_str(&format!(
            " ORDER BY created_at DESC, {} DESC LIMIT ?",
            id_column
        )),
        Direction::Prev => sql.push_str(&format!(
            " ORDER BY created_at ASC, {} ASC LIMIT ?",
            id_column
        )),
    }
}

pub(crate) async fn load_rule(
    conn: &mut SqliteConnection,
    rule_id: &str,
) -> Result<Rule, GovernanceError> {
    let row = sqlx::query("SELECT * FROM rules WHERE rule_id = ?")
        .bind(rule_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| GovernanceError::not_found(format!("rule not found: {}", rule_id)))?;
    Rule::from_row(&row)
}

pub(crate) async fn load_rule_version(
    conn: &mut SqliteConnection,
    rule_version_id: &str,
) -> Result<RuleVersion, GovernanceError> {
    let row = sqlx::query("SELECT * FROM rule_versions WHERE rule_version_id = ?")
        .bind(rule_version_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| {
            GovernanceError::not_found(format!("rule version not found: {}", rule_version_id))
        })?;
    RuleVersion::from_row(&row)
}

pub(crate) async fn set_rule_version_status(
    conn: &mut SqliteConnection,
    rule_version_id: &str,
    status: VersionStatus,
    decided_by: Option<&str>,
) -> Result<(), GovernanceError> {
    match decided_by {
        Some(actor) => {
            sqlx::query(
                "UPDATE rule_versions SET status = ?, approved_by = ?, approved_at = ? \
                 WHERE rule_version_id = ?",
            )
            .bind(status.as_str())
            .bind(actor)
            .bind(format_ts(&Utc::now()))
            .bind(rule_version_id)
            .execute(conn)
            .await?;
        }
        None => {
            sqlx::query("UPDATE rule_versions SET status = ? WHERE rule_version_id = ?")
                .bind(status.as_str())
                .bind(rule_version_id)
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

/// After version approval: supersede older APPROVED siblings and sync the
/// identity row's current version and status.
pub(crate) async fn apply_rule_version_approval(
    conn: &mut SqliteConnection,
    version: &RuleVersion,
) -> Result<(), GovernanceError> {
    sqlx::query(
        "UPDATE rule_versions SET status = 'SUPERSEDED' \
         WHERE rule_id = ? AND status = 'APPROVED' AND rule_version_id <> ?",
    )
    .bind(&version.rule_id)
    .bind(&version.rule_version_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE rules SET status = 'APPROVED', current_version = ?, \
         row_version = row_version + 1, updated_at = ? WHERE rule_id = ?",
    )
    .bind(version.version)
    .bind(format_ts(&Utc::now()))
    .bind(&version.rule_id)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_accepts_known_dimensions() {
        let scope = json!({"network": ["VISA"], "country": ["IN", "US"]});
        assert!(validate_scope(&scope).is_ok());
        assert!(validate_scope(&json!({})).is_ok());
    }

    #[test]
    fn scope_rejects_unknown_dimension() {
        let err = validate_scope(&json!({"galaxy": ["milky-way"]})).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn scope_rejects_empty_or_nonstring_lists() {
        assert!(validate_scope(&json!({"mcc": []})).is_err());
        assert!(validate_scope(&json!({"mcc": [6011]})).is_err());
        assert!(validate_scope(&json!({"mcc": ""})).is_err());
    }
}
