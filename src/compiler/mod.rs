//! Deterministic ruleset compiler.
//!
//! Turns a committed ruleset version into the canonical artifact byte
//! sequence: load, validate every member tree against the catalog, sort,
//! annotate with the evaluation mode, canonicalize, checksum. Compiling
//! the same committed state twice yields byte-identical output.

use serde_json::{json, Value};
use sqlx::SqliteConnection;
use std::collections::HashMap;

use crate::canonical;
use crate::catalog::FieldMeta;
use crate::condition::{validate::validate_tree, ConditionNode};
use crate::database::models::{RulesetVersion, VersionStatus};
use crate::error::GovernanceError;
use crate::rulesets;

#[derive(Debug)]
pub struct CompiledArtifact {
    pub bytes: Vec<u8>,
    pub checksum: String,
    pub ast: Value,
}

/// Compile a ruleset version on the caller's connection.
///
/// Accepted source states: PENDING_APPROVAL (the approve flow), APPROVED,
/// and ACTIVE. DRAFT, REJECTED, and SUPERSEDED versions do not compile.
pub async fn compile(
    conn: &mut SqliteConnection,
    catalog: &HashMap<String, FieldMeta>,
    ruleset_version_id: &str,
) -> Result<CompiledArtifact, GovernanceError> {
    let version = rulesets::load_ruleset_version(conn, ruleset_version_id).await?;
    check_compilable(&version)?;

    let ruleset = rulesets::load_ruleset(conn, &version.ruleset_id).await?;
    let mut members = rulesets::member_rule_versions(conn, ruleset_version_id).await?;

    for member in &members {
        if member.status != VersionStatus::Approved {
            return Err(compile_error(
                ruleset_version_id,
                &member.rule_version_id,
                &member.rule_id,
                "$",
                "member rule version is not APPROVED",
            ));
        }
        ConditionNode::parse(&member.condition_tree)
            .and_then(|tree| validate_tree(&tree, catalog))
            .map_err(|err| {
                let details = err.envelope();
                compile_error(
                    ruleset_version_id,
                    &member.rule_version_id,
                    &member.rule_id,
                    details["details"]["path"].as_str().unwrap_or("$"),
                    details["details"]["reason"]
                        .as_str()
                        .unwrap_or("condition tree validation failed"),
                )
            })?;
    }

    // Priority descending, rule id ascending; rule ids are time-ordered so
    // the tie-break is stable across compilations.
    members.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });

    let rules: Vec<Value> = members
        .iter()
        .map(|member| {
            json!({
                "ruleId": member.rule_id,
                "ruleVersionId": member.rule_version_id,
                "priority": member.priority,
                "when": member.condition_tree,
                "action": member.action.as_str(),
                "scope": member.scope,
            })
        })
        .collect();

    let ast = json!({
        "rulesetId": ruleset.ruleset_id,
        "version": version.version,
        "ruleType": ruleset.rule_type.as_str(),
        "evaluation": {"mode": ruleset.rule_type.evaluation_mode()},
        "velocityFailurePolicy": "SKIP",
        "rules": rules,
    });

    let (bytes, checksum) = canonical::canonicalize(&ast);
    Ok(CompiledArtifact {
        bytes,
        checksum,
        ast,
    })
}

fn check_compilable(version: &RulesetVersion) -> Result<(), GovernanceError> {
    match version.status {
        VersionStatus::PendingApproval | VersionStatus::Approved | VersionStatus::Active => Ok(()),
        other => Err(GovernanceError::invalid_state(format!(
            "ruleset version {} is {} and cannot be compiled",
            version.ruleset_version_id,
            other.as_str()
        ))),
    }
}

fn compile_error(
    ruleset_version_id: &str,
    rule_version_id: &str,
    rule_id: &str,
    path: &str,
    reason: &str,
) -> GovernanceError {
    GovernanceError::compilation(
        format!("ruleset compilation failed: {}", reason),
        json!({
            "ruleset_version_id": ruleset_version_id,
            "rule_version_id": rule_version_id,
            "rule_id": rule_id,
            "path": path,
            "reason": reason,
        }),
    )
}
