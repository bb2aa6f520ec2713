//! Ruleset identities and snapshot-bound ruleset versions.
//!
//! A ruleset is keyed by `(environment, region, country, rule_type)`; its
//! versions bind an immutable set of approved rule-version snapshots, the
//! unit of compilation and publishing.

use chrono::Utc;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::info;

use crate::audit;
use crate::authorization::{Permission, Principal};
use crate::database::models::{Ruleset, RulesetVersion, RuleType, RuleVersion, VersionStatus};
use crate::database::{format_ts, Database};
use crate::error::GovernanceError;
use crate::ids;
use crate::pagination::{self, Cursor, Page, PageRequest};
use crate::rules::push_keyset_clause;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct RulesetFilters {
    pub environment: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub rule_type: Option<RuleType>,
}

/// A ruleset version together with its member rule-version ids.
#[derive(Debug, Clone)]
pub struct RulesetVersionDetail {
    pub version: RulesetVersion,
    pub rule_version_ids: Vec<String>,
}

#[derive(Clone)]
pub struct RulesetService {
    db: Database,
}

impl RulesetService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a ruleset identity; the natural key is unique and immutable.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_ruleset(
        &self,
        environment: &str,
        region: &str,
        country: &str,
        rule_type: RuleType,
        name: &str,
        description: &str,
        by: &Principal,
    ) -> Result<Ruleset, GovernanceError> {
        by.require(Permission::AuthorRules)?;
        for (label, value) in [
            ("environment", environment),
            ("region", region),
            ("country", country),
            ("name", name),
        ] {
            if value.trim().is_empty() {
                return Err(GovernanceError::validation(format!("{} is required", label)));
            }
        }

        let mut tx = self.db.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT ruleset_id FROM rulesets \
             WHERE environment = ? AND region = ? AND country = ? AND rule_type = ?",
        )
        .bind(environment)
        .bind(region)
        .bind(country)
        .bind(rule_type.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(ruleset_id) = existing {
            return Err(GovernanceError::conflict_with(
                "ruleset already exists for this environment, region, country and rule type",
                json!({"ruleset_id": ruleset_id}),
            ));
        }

        let ruleset = Ruleset {
            ruleset_id: ids::generate(),
            environment: environment.to_string(),
            region: region.to_string(),
            country: country.to_string(),
            rule_type,
            name: name.to_string(),
            description: description.to_string(),
            created_by: by.subject.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO rulesets (ruleset_id, environment, region, country, rule_type, name, \
             description, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ruleset.ruleset_id)
        .bind(&ruleset.environment)
        .bind(&ruleset.region)
        .bind(&ruleset.country)
        .bind(ruleset.rule_type.as_str())
        .bind(&ruleset.name)
        .bind(&ruleset.description)
        .bind(&ruleset.created_by)
        .bind(format_ts(&ruleset.created_at))
        .bind(format_ts(&ruleset.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            "RULESET",
            &ruleset.ruleset_id,
            "CREATE",
            None,
            Some(&serde_json::to_value(&ruleset)?),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        info!(ruleset_id = %ruleset.ruleset_id, rule_type = rule_type.as_str(), "ruleset created");
        Ok(ruleset)
    }

    /// Name and description stay mutable; the natural key does not.
    pub async fn update_ruleset(
        &self,
        ruleset_id: &str,
        name: &str,
        description: &str,
        by: &Principal,
    ) -> Result<Ruleset, GovernanceError> {
        by.require(Permission::AuthorRules)?;
        let mut tx = self.db.begin().await?;
        let before = load_ruleset(&mut tx, ruleset_id).await?;

        sqlx::query(
            "UPDATE rulesets SET name = ?, description = ?, updated_at = ? WHERE ruleset_id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(format_ts(&Utc::now()))
        .bind(ruleset_id)
        .execute(&mut *tx)
        .await?;

        let after = load_ruleset(&mut tx, ruleset_id).await?;
        audit::record(
            &mut tx,
            "RULESET",
            ruleset_id,
            "UPDATE",
            Some(&serde_json::to_value(&before)?),
            Some(&audit::diff(
                &serde_json::to_value(&before)?,
                &serde_json::to_value(&after)?,
            )),
            &by.subject,
        )
        .await?;
        tx.commit().await?;
        Ok(after)
    }

    /// Create the next ruleset version in DRAFT with snapshot-bound
    /// membership. Every member must exist and carry the ruleset's rule
    /// type; the persistence layer enforces the same with a trigger.
    pub async fn create_ruleset_version(
        &self,
        ruleset_id: &str,
        rule_version_ids: &[String],
        by: &Principal,
    ) -> Result<RulesetVersionDetail, GovernanceError> {
        by.require(Permission::AuthorRules)?;
        if rule_version_ids.is_empty() {
            return Err(GovernanceError::validation(
                "ruleset version requires at least one rule version",
            ));
        }
        let mut deduped = rule_version_ids.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        if deduped.len() != rule_version_ids.len() {
            return Err(GovernanceError::validation(
                "duplicate rule version in membership",
            ));
        }

        let mut tx = self.db.begin().await?;
        let ruleset = load_ruleset(&mut tx, ruleset_id).await?;

        for rule_version_id in rule_version_ids {
            let member = crate::rules::load_rule_version(&mut tx, rule_version_id).await?;
            let rule = crate::rules::load_rule(&mut tx, &member.rule_id).await?;
            if rule.rule_type != ruleset.rule_type {
                return Err(GovernanceError::validation_with(
                    "rule type does not match ruleset",
                    json!({
                        "ruleset_id": ruleset_id,
                        "rule_version_id": rule_version_id,
                        "rule_type": rule.rule_type.as_str(),
                        "ruleset_rule_type": ruleset.rule_type.as_str(),
                    }),
                ));
            }
        }

        let next: i64 = sqlx::query_scalar(
            "SELECT MAX(version) FROM ruleset_versions WHERE ruleset_id = ?",
        )
        .bind(ruleset_id)
        .fetch_one(&mut *tx)
        .await
        .map(|v: Option<i64>| v.unwrap_or(0) + 1)?;

        let version = RulesetVersion {
            ruleset_version_id: ids::generate(),
            ruleset_id: ruleset_id.to_string(),
            version: next,
            status: VersionStatus::Draft,
            created_by: by.subject.clone(),
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            activated_at: None,
        };

        sqlx::query(
            "INSERT INTO ruleset_versions (ruleset_version_id, ruleset_id, version, status, \
             created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.ruleset_version_id)
        .bind(&version.ruleset_id)
        .bind(version.version)
        .bind(version.status.as_str())
        .bind(&version.created_by)
        .bind(format_ts(&version.created_at))
        .execute(&mut *tx)
        .await?;

        for rule_version_id in rule_version_ids {
            sqlx::query(
                "INSERT INTO ruleset_version_rules (ruleset_version_id, rule_version_id) \
                 VALUES (?, ?)",
            )
            .bind(&version.ruleset_version_id)
            .bind(rule_version_id)
            .execute(&mut *tx)
            .await?;
        }

        audit::record(
            &mut tx,
            "RULESET_VERSION",
            &version.ruleset_version_id,
            "CREATE",
            None,
            Some(&json!({
                "ruleset_id": ruleset_id,
                "version": version.version,
                "rule_version_ids": rule_version_ids,
            })),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        Ok(RulesetVersionDetail {
            version,
            rule_version_ids: rule_version_ids.to_vec(),
        })
    }

    pub async fn get_ruleset(&self, ruleset_id: &str) -> Result<Ruleset, GovernanceError> {
        let mut conn = self.db.pool().acquire().await?;
        load_ruleset(&mut conn, ruleset_id).await
    }

    pub async fn get_ruleset_version(
        &self,
        ruleset_version_id: &str,
    ) -> Result<RulesetVersionDetail, GovernanceError> {
        let mut conn = self.db.pool().acquire().await?;
        let version = load_ruleset_version(&mut conn, ruleset_version_id).await?;
        let rule_version_ids = member_ids(&mut conn, ruleset_version_id).await?;
        Ok(RulesetVersionDetail {
            version,
            rule_version_ids,
        })
    }

    pub async fn list_rulesets(
        &self,
        filters: &RulesetFilters,
        request: &PageRequest,
    ) -> Result<Page<Ruleset>, GovernanceError> {
        let mut sql = String::from("SELECT * FROM rulesets WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(environment) = &filters.environment {
            sql.push_str(" AND environment = ?");
            binds.push(environment.clone());
        }
        if let Some(region) = &filters.region {
            sql.push_str(" AND region = ?");
            binds.push(region.clone());
        }
        if let Some(country) = &filters.country {
            sql.push_str(" AND country = ?");
            binds.push(country.clone());
        }
        if let Some(rule_type) = filters.rule_type {
            sql.push_str(" AND rule_type = ?");
            binds.push(rule_type.as_str().to_string());
        }
        push_keyset_clause(&mut sql, &mut binds, request, "ruleset_id");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(request.limit + 1);

        let rows = q.fetch_all(self.db.pool()).await?;
        let rulesets = rows
            .iter()
            .map(Ruleset::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pagination::assemble(rulesets, request, |r| {
            Cursor::new(r.ruleset_id.clone(), r.created_at)
        }))
    }

    pub async fn list_ruleset_versions(
        &self,
        ruleset_id: &str,
        status: Option<VersionStatus>,
        request: &PageRequest,
    ) -> Result<Page<RulesetVersion>, GovernanceError> {
        let mut sql = String::from("SELECT * FROM ruleset_versions WHERE ruleset_id = ?");
        let mut binds: Vec<String> = vec![ruleset_id.to_string()];

        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        push_keyset_clause(&mut sql, &mut binds, request, "ruleset_version_id");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(request.limit + 1);

        let rows = q.fetch_all(self.db.pool()).await?;
        let versions = rows
            .iter()
            .map(RulesetVersion::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pagination::assemble(versions, request, |v| {
            Cursor::new(v.ruleset_version_id.clone(), v.created_at)
        }))
    }
}

pub(crate) async fn load_ruleset(
    conn: &mut SqliteConnection,
    ruleset_id: &str,
) -> Result<Ruleset, GovernanceError> {
    let row = sqlx::query("SELECT * FROM rulesets WHERE ruleset_id = ?")
        .bind(ruleset_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| GovernanceError::not_found(format!("ruleset not found: {}", ruleset_id)))?;
    Ruleset::from_row(&row)
}

pub(crate) async fn load_ruleset_version(
    conn: &mut SqliteConnection,
    ruleset_version_id: &str,
) -> Result<RulesetVersion, GovernanceError> {
    let row = sqlx::query("SELECT * FROM ruleset_versions WHERE ruleset_version_id = ?")
        .bind(ruleset_version_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| {
            GovernanceError::not_found(format!(
                "ruleset version not found: {}",
                ruleset_version_id
            ))
        })?;
    RulesetVersion::from_row(&row)
}

pub(crate) async fn member_ids(
    conn: &mut SqliteConnection,
    ruleset_version_id: &str,
) -> Result<Vec<String>, GovernanceError> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT rule_version_id FROM ruleset_version_rules WHERE ruleset_version_id = ? \
         ORDER BY rule_version_id",
    )
    .bind(ruleset_version_id)
    .fetch_all(conn)
    .await?;
    Ok(ids)
}

/// Member rule versions joined with their owning rules' identifiers.
pub(crate) async fn member_rule_versions(
    conn: &mut SqliteConnection,
    ruleset_version_id: &str,
) -> Result<Vec<RuleVersion>, GovernanceError> {
    let rows = sqlx::query(
        "SELECT rv.* FROM rule_versions rv \
         JOIN ruleset_version_rules m ON m.rule_version_id = rv.rule_version_id \
         WHERE m.ruleset_version_id = ?",
    )
    .bind(ruleset_version_id)
    .fetch_all(conn)
    .await?;
    rows.iter().map(RuleVersion::from_row).collect()
}

pub(crate) async fn set_ruleset_version_status(
    conn: &mut SqliteConnection,
    ruleset_version_id: &str,
    status: VersionStatus,
    decided_by: Option<&str>,
) -> Result<(), GovernanceError> {
    match decided_by {
        Some(actor) => {
            sqlx::query(
                "UPDATE ruleset_versions SET status = ?, approved_by = ?, approved_at = ? \
                 WHERE ruleset_version_id = ?",
            )
            .bind(status.as_str())
            .bind(actor)
            .bind(format_ts(&Utc::now()))
            .bind(ruleset_version_id)
            .execute(conn)
            .await?;
        }
        None => {
            sqlx::query("UPDATE ruleset_versions SET status = ? WHERE ruleset_version_id = ?")
                .bind(status.as_str())
                .bind(ruleset_version_id)
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

/// Supersede older APPROVED sibling versions of the same ruleset.
pub(crate) async fn supersede_prior_approved(
    conn: &mut SqliteConnection,
    ruleset_id: &str,
    keep_ruleset_version_id: &str,
) -> Result<(), GovernanceError> {
    sqlx::query(
        "UPDATE ruleset_versions SET status = 'SUPERSEDED' \
         WHERE ruleset_id = ? AND status = 'APPROVED' AND ruleset_version_id <> ?",
    )
    .bind(ruleset_id)
    .bind(keep_ruleset_version_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// The currently ACTIVE sibling, if any.
pub(crate) async fn find_active_version(
    conn: &mut SqliteConnection,
    ruleset_id: &str,
) -> Result<Option<RulesetVersion>, GovernanceError> {
    let row = sqlx::query(
        "SELECT * FROM ruleset_versions WHERE ruleset_id = ? AND status = 'ACTIVE'",
    )
    .bind(ruleset_id)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(RulesetVersion::from_row).transpose()
}
