//! Maker-checker approval engine.
//!
//! One uniform state machine drives rule versions, ruleset versions, and
//! field versions:
//!
//! ```text
//! DRAFT -submit-> PENDING_APPROVAL -approve-> APPROVED -activate-> ACTIVE
//!                      |                          |                  |
//!                      +-reject-> REJECTED        +--> SUPERSEDED <--+
//! ```
//!
//! The actor who authored a version can never be the actor who decides it.
//! Approving a ruleset version triggers publication inside the same
//! transaction; a publish failure aborts the approval with no state change.

use chrono::Utc;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::info;

use crate::audit;
use crate::authorization::{Permission, Principal};
use crate::catalog::{self, CatalogService};
use crate::database::models::{
    Approval, ApprovalAction, ApprovalStatus, EntityType, RulesetVersion, VersionStatus,
};
use crate::database::{format_ts, Database};
use crate::error::GovernanceError;
use crate::ids;
use crate::publisher::Publisher;
use crate::rules;
use crate::rulesets;

#[derive(Clone)]
pub struct ApprovalEngine {
    db: Database,
    catalog: CatalogService,
    publisher: Publisher,
}

/// Status and author of the entity under decision.
struct EntityState {
    status: VersionStatus,
    created_by: String,
}

impl ApprovalEngine {
    pub fn new(db: Database, catalog: CatalogService, publisher: Publisher) -> Self {
        Self {
            db,
            catalog,
            publisher,
        }
    }

    /// DRAFT -> PENDING_APPROVAL.
    ///
    /// With an idempotency key, re-submission returns the stored approval
    /// row without any further state change.
    pub async fn submit(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        by: &Principal,
        remarks: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<Approval, GovernanceError> {
        by.require(submit_permission(entity_type))?;

        let mut tx = self.db.begin().await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) =
                find_by_idempotency_key(&mut tx, entity_type, entity_id, key).await?
            {
                tx.commit().await?;
                return Ok(existing);
            }
        }

        let state = load_entity_state(&mut tx, entity_type, entity_id).await?;
        if state.status != VersionStatus::Draft {
            return Err(GovernanceError::invalid_state(format!(
                "cannot submit {} from {}",
                entity_id,
                state.status.as_str()
            )));
        }

        set_status(&mut tx, entity_type, entity_id, VersionStatus::PendingApproval, None).await?;

        let approval = Approval {
            approval_id: ids::generate(),
            entity_type,
            entity_id: entity_id.to_string(),
            action: ApprovalAction::Submit,
            status: ApprovalStatus::Pending,
            maker: by.subject.clone(),
            checker: None,
            remarks: remarks.map(str::to_string),
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: Utc::now(),
            decided_at: None,
        };
        insert_approval(&mut tx, &approval).await?;

        audit::record(
            &mut tx,
            entity_type.as_str(),
            entity_id,
            "SUBMIT",
            Some(&json!({"status": "DRAFT"})),
            Some(&json!({"status": "PENDING_APPROVAL"})),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        info!(entity_type = entity_type.as_str(), entity_id, maker = %by.subject, "submitted for approval");
        Ok(approval)
    }

    /// PENDING_APPROVAL -> APPROVED. Ruleset approvals publish in the same
    /// transaction; prior APPROVED siblings become SUPERSEDED.
    pub async fn approve(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        by: &Principal,
        remarks: Option<&str>,
    ) -> Result<Approval, GovernanceError> {
        by.require(Permission::ApproveRules)?;

        // Resolved before the transaction starts; the publish step must not
        // contend for a second pooled connection mid-transaction.
        let fields = self.catalog.get_active_catalog().await?;

        let mut tx = self.db.begin().await?;
        let state = load_entity_state(&mut tx, entity_type, entity_id).await?;

        if state.status != VersionStatus::PendingApproval {
            return Err(GovernanceError::invalid_state(format!(
                "cannot approve {} from {}",
                entity_id,
                state.status.as_str()
            )));
        }
        require_distinct_checker(&state, by)?;

        match entity_type {
            EntityType::RuleVersion => {
                set_status(
                    &mut tx,
                    entity_type,
                    entity_id,
                    VersionStatus::Approved,
                    Some(&by.subject),
                )
                .await?;
                let version = rules::load_rule_version(&mut tx, entity_id).await?;
                rules::apply_rule_version_approval(&mut tx, &version).await?;
            }
            EntityType::FieldVersion => {
                set_status(
                    &mut tx,
                    entity_type,
                    entity_id,
                    VersionStatus::Approved,
                    Some(&by.subject),
                )
                .await?;
                let version = catalog::load_field_version(&mut tx, entity_id).await?;
                catalog::apply_field_version_approval(&mut tx, &version).await?;
            }
            EntityType::RulesetVersion => {
                let version = rulesets::load_ruleset_version(&mut tx, entity_id).await?;
                let ruleset = rulesets::load_ruleset(&mut tx, &version.ruleset_id).await?;
                // Publish while still PENDING_APPROVAL; any failure aborts
                // the whole approval.
                self.publisher
                    .publish(&mut tx, &fields, &ruleset, &version, &by.subject)
                    .await?;
                set_status(
                    &mut tx,
                    entity_type,
                    entity_id,
                    VersionStatus::Approved,
                    Some(&by.subject),
                )
                .await?;
                rulesets::supersede_prior_approved(&mut tx, &version.ruleset_id, entity_id)
                    .await?;
            }
        }

        resolve_pending_submission(&mut tx, entity_type, entity_id, ApprovalStatus::Approved, by)
            .await?;

        let approval = Approval {
            approval_id: ids::generate(),
            entity_type,
            entity_id: entity_id.to_string(),
            action: ApprovalAction::Approve,
            status: ApprovalStatus::Approved,
            maker: state.created_by,
            checker: Some(by.subject.clone()),
            remarks: remarks.map(str::to_string),
            idempotency_key: None,
            created_at: Utc::now(),
            decided_at: Some(Utc::now()),
        };
        insert_approval(&mut tx, &approval).await?;

        audit::record(
            &mut tx,
            entity_type.as_str(),
            entity_id,
            "APPROVE",
            Some(&json!({"status": "PENDING_APPROVAL"})),
            Some(&json!({"status": "APPROVED", "approved_by": by.subject})),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        if entity_type == EntityType::FieldVersion {
            self.catalog.invalidate().await;
        }

        info!(entity_type = entity_type.as_str(), entity_id, checker = %by.subject, "approved");
        Ok(approval)
    }

    /// PENDING_APPROVAL -> REJECTED (terminal). Never publishes.
    pub async fn reject(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        by: &Principal,
        remarks: Option<&str>,
    ) -> Result<Approval, GovernanceError> {
        by.require(Permission::ApproveRules)?;

        let mut tx = self.db.begin().await?;
        let state = load_entity_state(&mut tx, entity_type, entity_id).await?;

        if state.status != VersionStatus::PendingApproval {
            return Err(GovernanceError::invalid_state(format!(
                "cannot reject {} from {}",
                entity_id,
                state.status.as_str()
            )));
        }
        require_distinct_checker(&state, by)?;

        set_status(&mut tx, entity_type, entity_id, VersionStatus::Rejected, None).await?;
        resolve_pending_submission(&mut tx, entity_type, entity_id, ApprovalStatus::Rejected, by)
            .await?;

        let approval = Approval {
            approval_id: ids::generate(),
            entity_type,
            entity_id: entity_id.to_string(),
            action: ApprovalAction::Reject,
            status: ApprovalStatus::Rejected,
            maker: state.created_by,
            checker: Some(by.subject.clone()),
            remarks: remarks.map(str::to_string),
            idempotency_key: None,
            created_at: Utc::now(),
            decided_at: Some(Utc::now()),
        };
        insert_approval(&mut tx, &approval).await?;

        audit::record(
            &mut tx,
            entity_type.as_str(),
            entity_id,
            "REJECT",
            Some(&json!({"status": "PENDING_APPROVAL"})),
            Some(&json!({"status": "REJECTED", "rejected_by": by.subject})),
            &by.subject,
        )
        .await?;
        tx.commit().await?;

        info!(entity_type = entity_type.as_str(), entity_id, checker = %by.subject, "rejected");
        Ok(approval)
    }

    /// APPROVED -> ACTIVE for ruleset versions; demotes the currently
    /// ACTIVE sibling to SUPERSEDED in the same transaction.
    pub async fn activate(
        &self,
        ruleset_version_id: &str,
        by: &Principal,
    ) -> Result<RulesetVersion, GovernanceError> {
        by.require(Permission::ActivateRulesets)?;

        let mut tx = self.db.begin().await?;
        let version = rulesets::load_ruleset_version(&mut tx, ruleset_version_id).await?;

        if version.status != VersionStatus::Approved {
            return Err(GovernanceError::invalid_state(format!(
                "cannot activate {} from {}",
                ruleset_version_id,
                version.status.as_str()
            )));
        }

        if let Some(active) = rulesets::find_active_version(&mut tx, &version.ruleset_id).await? {
            rulesets::set_ruleset_version_status(
                &mut tx,
                &active.ruleset_version_id,
                VersionStatus::Superseded,
                None,
            )
            .await?;
            audit::record(
                &mut tx,
                "RULESET_VERSION",
                &active.ruleset_version_id,
                "SUPERSEDE",
                Some(&json!({"status": "ACTIVE"})),
                Some(&json!({"status": "SUPERSEDED"})),
                &by.subject,
            )
            .await?;
        }

        sqlx::query(
            "UPDATE ruleset_versions SET status = 'ACTIVE', activated_at = ? \
             WHERE ruleset_version_id = ?",
        )
        .bind(format_ts(&Utc::now()))
        .bind(ruleset_version_id)
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            "RULESET_VERSION",
            ruleset_version_id,
            "ACTIVATE",
            Some(&json!({"status": "APPROVED"})),
            Some(&json!({"status": "ACTIVE"})),
            &by.subject,
        )
        .await?;

        let activated = rulesets::load_ruleset_version(&mut tx, ruleset_version_id).await?;
        tx.commit().await?;

        info!(ruleset_version_id, actor = %by.subject, "ruleset version activated");
        Ok(activated)
    }

    pub async fn get_approval(&self, approval_id: &str) -> Result<Approval, GovernanceError> {
        let row = sqlx::query("SELECT * FROM approvals WHERE approval_id = ?")
            .bind(approval_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| {
                GovernanceError::not_found(format!("approval not found: {}", approval_id))
            })?;
        Approval::from_row(&row)
    }
}

fn submit_permission(entity_type: EntityType) -> Permission {
    match entity_type {
        EntityType::FieldVersion => Permission::ManageFields,
        EntityType::RuleVersion | EntityType::RulesetVersion => Permission::AuthorRules,
    }
}

fn require_distinct_checker(state: &EntityState, by: &Principal) -> Result<(), GovernanceError> {
    if state.created_by == by.subject {
        return Err(GovernanceError::Forbidden {
            message: "maker and checker must be different actors".to_string(),
            details: Some(json!({"maker": state.created_by, "checker": by.subject})),
        });
    }
    Ok(())
}

async fn load_entity_state(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<EntityState, GovernanceError> {
    let state = match entity_type {
        EntityType::RuleVersion => {
            let v = rules::load_rule_version(conn, entity_id).await?;
            EntityState {
                status: v.status,
                created_by: v.created_by,
            }
        }
        EntityType::RulesetVersion => {
            let v = rulesets::load_ruleset_version(conn, entity_id).await?;
            EntityState {
                status: v.status,
                created_by: v.created_by,
            }
        }
        EntityType::FieldVersion => {
            let v = catalog::load_field_version(conn, entity_id).await?;
            EntityState {
                status: v.status,
                created_by: v.created_by,
            }
        }
    };
    Ok(state)
}

async fn set_status(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
    status: VersionStatus,
    decided_by: Option<&str>,
) -> Result<(), GovernanceError> {
    match entity_type {
        EntityType::RuleVersion => {
            rules::set_rule_version_status(conn, entity_id, status, decided_by).await
        }
        EntityType::RulesetVersion => {
            rulesets::set_ruleset_version_status(conn, entity_id, status, decided_by).await
        }
        EntityType::FieldVersion => {
            catalog::set_field_version_status(conn, entity_id, status, decided_by).await
        }
    }
}

async fn find_by_idempotency_key(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
    idempotency_key: &str,
) -> Result<Option<Approval>, GovernanceError> {
    let row = sqlx::query(
        "SELECT * FROM approvals \
         WHERE entity_type = ? AND entity_id = ? AND idempotency_key = ?",
    )
    .bind(entity_type.as_str())
    .bind(entity_id)
    .bind(idempotency_key)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(Approval::from_row).transpose()
}

async fn insert_approval(
    conn: &mut SqliteConnection,
    approval: &Approval,
) -> Result<(), GovernanceError> {
    sqlx::query(
        "INSERT INTO approvals (approval_id, entity_type, entity_id, action, status, maker, \
         checker, remarks, idempotency_key, created_at, decided_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&approval.approval_id)
    .bind(approval.entity_type.as_str())
    .bind(&approval.entity_id)
    .bind(approval.action.as_str())
    .bind(approval.status.as_str())
    .bind(&approval.maker)
    .bind(&approval.checker)
    .bind(&approval.remarks)
    .bind(&approval.idempotency_key)
    .bind(format_ts(&approval.created_at))
    .bind(approval.decided_at.as_ref().map(format_ts))
    .execute(conn)
    .await?;
    Ok(())
}

/// Close out the pending SUBMIT row once a decision lands.
async fn resolve_pending_submission(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
    outcome: ApprovalStatus,
    by: &Principal,
) -> Result<(), GovernanceError> {
    sqlx::query(
        "UPDATE approvals SET status = ?, checker = ?, decided_at = ? \
         WHERE entity_type = ? AND entity_id = ? AND action = 'SUBMIT' AND status = 'PENDING'",
    )
    .bind(outcome.as_str())
    .bind(&by.subject)
    .bind(format_ts(&Utc::now()))
    .bind(entity_type.as_str())
    .bind(entity_id)
    .execute(conn)
    .await?;
    Ok(())
}
