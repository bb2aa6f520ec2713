//! Field registry publication.

mod common;

use common::*;
use serde_json::Value;

use rule_governance::database::models::{EntityType, RuleAction, RuleType};

#[tokio::test]
async fn registry_publication_writes_artifact_pointer_and_row() {
    let h = setup().await;

    let manifest = h.registry.publish(&admin()).await.unwrap();
    assert_eq!(manifest.registry_version, 1);
    assert_eq!(manifest.field_count, 26);
    assert!(manifest.checksum.starts_with("sha256:"));

    let artifact = h
        .store
        .get("fields/registry/v1/fields.json")
        .await
        .unwrap()
        .expect("registry artifact missing");
    let snapshot: Value = serde_json::from_slice(&artifact).unwrap();
    assert_eq!(snapshot["registry_version"], 1);
    assert_eq!(snapshot["field_count"], 26);
    let fields = snapshot["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 26);
    assert_eq!(fields[0]["field_id"], 1);
    assert_eq!(fields[25]["field_id"], 26);

    let pointer = h
        .store
        .get("fields/registry/manifest.json")
        .await
        .unwrap()
        .expect("registry pointer missing");
    let pointer: Value = serde_json::from_slice(&pointer).unwrap();
    assert_eq!(pointer["registry_version"], 1);
    assert_eq!(pointer["checksum"], manifest.checksum);

    let latest = h.registry.latest().await.unwrap().unwrap();
    assert_eq!(latest.registry_version, 1);
}

#[tokio::test]
async fn registry_versions_are_monotonic() {
    let h = setup().await;
    let first = h.registry.publish(&admin()).await.unwrap();
    let second = h.registry.publish(&admin()).await.unwrap();
    assert_eq!(first.registry_version, 1);
    assert_eq!(second.registry_version, 2);
    assert!(h.store.get("fields/registry/v2/fields.json").await.unwrap().is_some());
}

#[tokio::test]
async fn registry_publication_requires_permission() {
    let h = setup().await;
    let err = h.registry.publish(&maker()).await.unwrap_err();
    assert_eq!(err.kind(), "ForbiddenError");
}

#[tokio::test]
async fn ruleset_manifests_record_the_current_registry_version() {
    let h = setup().await;
    h.registry.publish(&admin()).await.unwrap();
    h.registry.publish(&admin()).await.unwrap();

    let member = approved_rule_version(
        &h,
        "High Amount",
        RuleType::Auth,
        high_amount_tree(),
        100,
        RuleAction::Decline,
    )
    .await;
    let (_, detail) = draft_ruleset_version(
        &h,
        "prod",
        RuleType::Auth,
        std::slice::from_ref(&member.rule_version_id),
    )
    .await;
    h.engine
        .submit(
            EntityType::RulesetVersion,
            &detail.version.ruleset_version_id,
            &maker(),
            None,
            None,
        )
        .await
        .unwrap();
    h.engine
        .approve(
            EntityType::RulesetVersion,
            &detail.version.ruleset_version_id,
            &checker(),
            None,
        )
        .await
        .unwrap();

    let mut conn = h.db.pool().acquire().await.unwrap();
    let manifest = h
        .publisher
        .latest_manifest(&mut conn, "prod", "INDIA", "IN", "AUTH")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manifest.field_registry_version, Some(2));
}
