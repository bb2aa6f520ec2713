#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use rule_governance::approvals::ApprovalEngine;
use rule_governance::audit::AuditService;
use rule_governance::authorization::{Permission, Principal};
use rule_governance::catalog::registry::RegistryPublisher;
use rule_governance::catalog::CatalogService;
use rule_governance::database::models::{EntityType, RuleAction, RuleType, RuleVersion, Ruleset};
use rule_governance::database::Database;
use rule_governance::publisher::Publisher;
use rule_governance::rules::RuleService;
use rule_governance::rulesets::{RulesetService, RulesetVersionDetail};
use rule_governance::storage::{fs::FsStore, ObjectStore};

pub struct TestHarness {
    pub db: Database,
    pub catalog: CatalogService,
    pub rules: RuleService,
    pub rulesets: RulesetService,
    pub engine: ApprovalEngine,
    pub publisher: Publisher,
    pub registry: RegistryPublisher,
    pub audit: AuditService,
    pub store: Arc<dyn ObjectStore>,
    // Held so the artifact directory outlives the test.
    pub store_dir: TempDir,
}

/// In-memory database, seeded standard catalog, tempdir-backed object store.
pub async fn setup() -> TestHarness {
    let db = Database::new_in_memory()
        .await
        .expect("failed to create test database");
    let catalog = CatalogService::new(db.clone());
    catalog
        .seed_standard_fields("system")
        .await
        .expect("failed to seed standard fields");

    let store_dir = TempDir::new().expect("failed to create artifact dir");
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(store_dir.path()));
    let publisher = Publisher::new(store.clone(), None);
    let registry = RegistryPublisher::new(catalog.clone(), store.clone(), None);
    let engine = ApprovalEngine::new(db.clone(), catalog.clone(), publisher.clone());

    TestHarness {
        rules: RuleService::new(db.clone(), catalog.clone()),
        rulesets: RulesetService::new(db.clone()),
        audit: AuditService::new(db.clone()),
        engine,
        publisher,
        registry,
        catalog,
        store,
        store_dir,
        db,
    }
}

pub fn maker() -> Principal {
    Principal::new(
        "maker-1",
        [Permission::AuthorRules, Permission::ManageFields],
    )
}

pub fn second_maker() -> Principal {
    Principal::new(
        "maker-2",
        [Permission::AuthorRules, Permission::ManageFields],
    )
}

pub fn checker() -> Principal {
    Principal::new("checker-1", [Permission::ApproveRules])
}

pub fn admin() -> Principal {
    Principal::new(
        "admin-1",
        [
            Permission::ActivateRulesets,
            Permission::PublishRegistry,
            Permission::ReadAudit,
        ],
    )
}

pub fn high_amount_tree() -> Value {
    json!({"field": "amount", "op": "GT", "value": 3000})
}

/// Create, submit, and approve a rule version in one step.
pub async fn approved_rule_version(
    harness: &TestHarness,
    rule_name: &str,
    rule_type: RuleType,
    tree: Value,
    priority: i64,
    action: RuleAction,
) -> RuleVersion {
    let rule = harness
        .rules
        .create_rule(rule_name, "", rule_type, &maker())
        .await
        .expect("create rule");
    let version = harness
        .rules
        .create_rule_version(&rule.rule_id, &tree, &json!({}), priority, action, None, &maker())
        .await
        .expect("create rule version");
    harness
        .engine
        .submit(
            EntityType::RuleVersion,
            &version.rule_version_id,
            &maker(),
            None,
            None,
        )
        .await
        .expect("submit rule version");
    harness
        .engine
        .approve(
            EntityType::RuleVersion,
            &version.rule_version_id,
            &checker(),
            None,
        )
        .await
        .expect("approve rule version");
    harness
        .rules
        .get_rule_version(&version.rule_version_id)
        .await
        .expect("reload rule version")
}

/// Create an AUTH ruleset with the given approved members and a DRAFT
/// first version.
pub async fn draft_ruleset_version(
    harness: &TestHarness,
    environment: &str,
    rule_type: RuleType,
    member_ids: &[String],
) -> (Ruleset, RulesetVersionDetail) {
    let ruleset = harness
        .rulesets
        .create_ruleset(
            environment,
            "INDIA",
            "IN",
            rule_type,
            &format!("{} {} rules", environment, rule_type.as_str()),
            "",
            &maker(),
        )
        .await
        .expect("create ruleset");
    let detail = harness
        .rulesets
        .create_ruleset_version(&ruleset.ruleset_id, member_ids, &maker())
        .await
        .expect("create ruleset version");
    (ruleset, detail)
}
