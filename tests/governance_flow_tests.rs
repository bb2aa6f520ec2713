//! End-to-end maker-checker flows over rules, fields, and rulesets.

mod common;

use common::*;
use serde_json::json;

use rule_governance::catalog::{FieldSpec, FIRST_CUSTOM_FIELD_ID};
use rule_governance::database::models::{
    ApprovalStatus, DataType, EntityType, Operator, RuleAction, RuleType, VersionStatus,
};

#[tokio::test]
async fn create_submit_approve_with_distinct_actors() {
    let h = setup().await;

    let rule = h
        .rules
        .create_rule("High Amount", "Decline very large payments", RuleType::Auth, &maker())
        .await
        .unwrap();
    assert_eq!(rule.status, VersionStatus::Draft);
    assert_eq!(rule.current_version, 1);

    let version = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            100,
            RuleAction::Decline,
            None,
            &maker(),
        )
        .await
        .unwrap();
    assert_eq!(version.status, VersionStatus::Draft);
    assert_eq!(version.version, 1);

    let submission = h
        .engine
        .submit(
            EntityType::RuleVersion,
            &version.rule_version_id,
            &maker(),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(submission.maker, "maker-1");
    assert_eq!(submission.status, ApprovalStatus::Pending);
    assert!(submission.checker.is_none());

    let pending = h.rules.get_rule_version(&version.rule_version_id).await.unwrap();
    assert_eq!(pending.status, VersionStatus::PendingApproval);

    let decision = h
        .engine
        .approve(
            EntityType::RuleVersion,
            &version.rule_version_id,
            &checker(),
            Some("looks right"),
        )
        .await
        .unwrap();
    assert_eq!(decision.maker, "maker-1");
    assert_eq!(decision.checker.as_deref(), Some("checker-1"));

    let approved = h.rules.get_rule_version(&version.rule_version_id).await.unwrap();
    assert_eq!(approved.status, VersionStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("checker-1"));
    assert!(approved.approved_at.is_some());

    let identity = h.rules.get_rule(&rule.rule_id).await.unwrap();
    assert_eq!(identity.status, VersionStatus::Approved);
    assert_eq!(identity.current_version, 1);
}

#[tokio::test]
async fn approve_by_the_maker_is_forbidden() {
    let h = setup().await;

    let rule = h
        .rules
        .create_rule("High Amount", "", RuleType::Auth, &maker())
        .await
        .unwrap();
    let version = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            100,
            RuleAction::Decline,
            None,
            &maker(),
        )
        .await
        .unwrap();
    h.engine
        .submit(EntityType::RuleVersion, &version.rule_version_id, &maker(), None, None)
        .await
        .unwrap();

    // maker-1 also holds ApproveRules; separation of duties must still hold.
    let self_checker = rule_governance::authorization::Principal::new(
        "maker-1",
        [rule_governance::authorization::Permission::ApproveRules],
    );
    let err = h
        .engine
        .approve(EntityType::RuleVersion, &version.rule_version_id, &self_checker, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ForbiddenError");

    let unchanged = h.rules.get_rule_version(&version.rule_version_id).await.unwrap();
    assert_eq!(unchanged.status, VersionStatus::PendingApproval);
}

#[tokio::test]
async fn reject_is_terminal() {
    let h = setup().await;

    let rule = h
        .rules
        .create_rule("Risky MCCs", "", RuleType::Auth, &maker())
        .await
        .unwrap();
    let version = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &json!({"field": "mcc", "op": "IN", "value": ["7995"]}),
            &json!({}),
            10,
            RuleAction::Review,
            None,
            &maker(),
        )
        .await
        .unwrap();
    h.engine
        .submit(EntityType::RuleVersion, &version.rule_version_id, &maker(), None, None)
        .await
        .unwrap();
    h.engine
        .reject(EntityType::RuleVersion, &version.rule_version_id, &checker(), Some("too broad"))
        .await
        .unwrap();

    let rejected = h.rules.get_rule_version(&version.rule_version_id).await.unwrap();
    assert_eq!(rejected.status, VersionStatus::Rejected);

    let err = h
        .engine
        .submit(EntityType::RuleVersion, &version.rule_version_id, &maker(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidStateError");
}

#[tokio::test]
async fn idempotent_submit_returns_the_stored_approval() {
    let h = setup().await;

    let rule = h
        .rules
        .create_rule("High Amount", "", RuleType::Auth, &maker())
        .await
        .unwrap();
    let version = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            100,
            RuleAction::Decline,
            None,
            &maker(),
        )
        .await
        .unwrap();

    let first = h
        .engine
        .submit(
            EntityType::RuleVersion,
            &version.rule_version_id,
            &maker(),
            None,
            Some("k1"),
        )
        .await
        .unwrap();
    let second = h
        .engine
        .submit(
            EntityType::RuleVersion,
            &version.rule_version_id,
            &maker(),
            None,
            Some("k1"),
        )
        .await
        .unwrap();
    assert_eq!(first.approval_id, second.approval_id);

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM approvals WHERE entity_id = ? AND action = 'SUBMIT'",
    )
    .bind(&version.rule_version_id)
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn invalid_transitions_are_rejected() {
    let h = setup().await;

    let rule = h
        .rules
        .create_rule("High Amount", "", RuleType::Auth, &maker())
        .await
        .unwrap();
    let version = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            100,
            RuleAction::Decline,
            None,
            &maker(),
        )
        .await
        .unwrap();

    // Approve straight from DRAFT.
    let err = h
        .engine
        .approve(EntityType::RuleVersion, &version.rule_version_id, &checker(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidStateError");

    // Double submit without an idempotency key.
    h.engine
        .submit(EntityType::RuleVersion, &version.rule_version_id, &maker(), None, None)
        .await
        .unwrap();
    let err = h
        .engine
        .submit(EntityType::RuleVersion, &version.rule_version_id, &maker(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidStateError");
}

#[tokio::test]
async fn new_approval_supersedes_the_previous_version() {
    let h = setup().await;

    let first = approved_rule_version(
        &h,
        "High Amount",
        RuleType::Auth,
        high_amount_tree(),
        100,
        RuleAction::Decline,
    )
    .await;

    let second = h
        .rules
        .create_rule_version(
            &first.rule_id,
            &json!({"field": "amount", "op": "GT", "value": 5000}),
            &json!({}),
            100,
            RuleAction::Decline,
            None,
            &maker(),
        )
        .await
        .unwrap();
    h.engine
        .submit(EntityType::RuleVersion, &second.rule_version_id, &maker(), None, None)
        .await
        .unwrap();
    h.engine
        .approve(EntityType::RuleVersion, &second.rule_version_id, &checker(), None)
        .await
        .unwrap();

    let old = h.rules.get_rule_version(&first.rule_version_id).await.unwrap();
    assert_eq!(old.status, VersionStatus::Superseded);
    let identity = h.rules.get_rule(&first.rule_id).await.unwrap();
    assert_eq!(identity.current_version, 2);
}

#[tokio::test]
async fn optimistic_lock_conflicts_surface() {
    let h = setup().await;

    let rule = h
        .rules
        .create_rule("High Amount", "", RuleType::Auth, &maker())
        .await
        .unwrap();
    // Stale expectation: the identity row starts at row_version 1 and the
    // caller claims 7.
    let err = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            100,
            RuleAction::Decline,
            Some(7),
            &maker(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ConflictError");

    // The correct expectation succeeds.
    h.rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            100,
            RuleAction::Decline,
            Some(rule.row_version),
            &maker(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn rule_version_validation_rejects_bad_trees_and_scopes() {
    let h = setup().await;
    let rule = h
        .rules
        .create_rule("Bad", "", RuleType::Auth, &maker())
        .await
        .unwrap();

    let unknown_field = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &json!({"field": "no_such_field", "op": "EQ", "value": 1}),
            &json!({}),
            10,
            RuleAction::Review,
            None,
            &maker(),
        )
        .await
        .unwrap_err();
    assert_eq!(unknown_field.kind(), "ValidationError");

    let bad_scope = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({"planet": ["earth"]}),
            10,
            RuleAction::Review,
            None,
            &maker(),
        )
        .await
        .unwrap_err();
    assert_eq!(bad_scope.kind(), "ValidationError");

    let bad_priority = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &high_amount_tree(),
            &json!({}),
            1001,
            RuleAction::Review,
            None,
            &maker(),
        )
        .await
        .unwrap_err();
    assert_eq!(bad_priority.kind(), "ValidationError");
}

#[tokio::test]
async fn field_governance_runs_through_the_same_state_machine() {
    let h = setup().await;

    let spec = FieldSpec {
        display_name: "Issuer Country".to_string(),
        description: "Country of the issuing bank".to_string(),
        data_type: DataType::String,
        allowed_operators: vec![Operator::Eq, Operator::Ne, Operator::In],
        multi_value_allowed: true,
        is_sensitive: false,
        enum_values: None,
    };
    let field_version = h.catalog.create_field("issuer_country", spec, &maker()).await.unwrap();

    // Not yet approved: rules cannot reference it.
    let rule = h
        .rules
        .create_rule("Issuer check", "", RuleType::Auth, &maker())
        .await
        .unwrap();
    let err = h
        .rules
        .create_rule_version(
            &rule.rule_id,
            &json!({"field": "issuer_country", "op": "EQ", "value": "IN"}),
            &json!({}),
            10,
            RuleAction::Review,
            None,
            &maker(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");

    h.engine
        .submit(
            EntityType::FieldVersion,
            &field_version.field_version_id,
            &maker(),
            None,
            None,
        )
        .await
        .unwrap();
    h.engine
        .approve(
            EntityType::FieldVersion,
            &field_version.field_version_id,
            &checker(),
            None,
        )
        .await
        .unwrap();

    let field = h.catalog.get_field("issuer_country").await.unwrap();
    assert!(field.is_active);
    assert!(field.field_id >= FIRST_CUSTOM_FIELD_ID);

    // Approved and active: the same tree now validates.
    h.rules
        .create_rule_version(
            &rule.rule_id,
            &json!({"field": "issuer_country", "op": "EQ", "value": "IN"}),
            &json!({}),
            10,
            RuleAction::Review,
            None,
            &maker(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn activation_demotes_the_previous_active_version() {
    let h = setup().await;

    let member = approved_rule_version(
        &h,
        "High Amount",
        RuleType::Auth,
        high_amount_tree(),
        100,
        RuleAction::Decline,
    )
    .await;
    let (ruleset, v1) = draft_ruleset_version(
        &h,
        "prod",
        RuleType::Auth,
        std::slice::from_ref(&member.rule_version_id),
    )
    .await;

    h.engine
        .submit(
            EntityType::RulesetVersion,
            &v1.version.ruleset_version_id,
            &maker(),
            None,
            None,
        )
        .await
        .unwrap();
    h.engine
        .approve(EntityType::RulesetVersion, &v1.version.ruleset_version_id, &checker(), None)
        .await
        .unwrap();
    let v1_active = h.engine.activate(&v1.version.ruleset_version_id, &admin()).await.unwrap();
    assert_eq!(v1_active.status, VersionStatus::Active);
    assert!(v1_active.activated_at.is_some());

    let v2 = h
        .rulesets
        .create_ruleset_version(
            &ruleset.ruleset_id,
            std::slice::from_ref(&member.rule_version_id),
            &maker(),
        )
        .await
        .unwrap();
    h.engine
        .submit(
            EntityType::RulesetVersion,
            &v2.version.ruleset_version_id,
            &maker(),
            None,
            None,
        )
        .await
        .unwrap();
    h.engine
        .approve(EntityType::RulesetVersion, &v2.version.ruleset_version_id, &checker(), None)
        .await
        .unwrap();

    let v2_active = h.engine.activate(&v2.version.ruleset_version_id, &admin()).await.unwrap();
    assert_eq!(v2_active.status, VersionStatus::Active);

    let v1_after = h
        .rulesets
        .get_ruleset_version(&v1.version.ruleset_version_id)
        .await
        .unwrap();
    assert_eq!(v1_after.version.status, VersionStatus::Superseded);
    assert!(v2_active.activated_at.unwrap() > v1_active.activated_at.unwrap());

    let active_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ruleset_versions WHERE ruleset_id = ? AND status = 'ACTIVE'",
    )
    .bind(&ruleset.ruleset_id)
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(active_count, 1);
}

#[tokio::test]
async fn ruleset_natural_key_is_unique() {
    let h = setup().await;
    h.rulesets
        .create_ruleset("prod", "INDIA", "IN", RuleType::Auth, "auth rules", "", &maker())
        .await
        .unwrap();
    let err = h
        .rulesets
        .create_ruleset("prod", "INDIA", "IN", RuleType::Auth, "again", "", &maker())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ConflictError");
}

#[tokio::test]
async fn membership_rejects_foreign_rule_types() {
    let h = setup().await;
    let member = approved_rule_version(
        &h,
        "Watch big amounts",
        RuleType::Monitoring,
        high_amount_tree(),
        50,
        RuleAction::Review,
    )
    .await;
    let ruleset = h
        .rulesets
        .create_ruleset("prod", "INDIA", "IN", RuleType::Auth, "auth rules", "", &maker())
        .await
        .unwrap();

    let err = h
        .rulesets
        .create_ruleset_version(
            &ruleset.ruleset_id,
            std::slice::from_ref(&member.rule_version_id),
            &maker(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
}

#[tokio::test]
async fn audit_trail_records_every_transition() {
    let h = setup().await;
    let version = approved_rule_version(
        &h,
        "High Amount",
        RuleType::Auth,
        high_amount_tree(),
        100,
        RuleAction::Decline,
    )
    .await;

    let page = h
        .audit
        .list(
            &rule_governance::audit::AuditQuery {
                entity_id: Some(version.rule_version_id.clone()),
                ..Default::default()
            },
            &rule_governance::pagination::PageRequest::first_page(None, 100, 1000),
        )
        .await
        .unwrap();

    let actions: Vec<&str> = page.items.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"CREATE"));
    assert!(actions.contains(&"SUBMIT"));
    assert!(actions.contains(&"APPROVE"));
}
