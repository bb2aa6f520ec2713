//! Snapshot tests pinning the external byte contracts.

use insta::assert_snapshot;
use serde_json::json;

use rule_governance::canonical;
use rule_governance::error::GovernanceError;

#[test]
fn artifact_canonical_form_is_pinned() {
    let ast = json!({
        "rulesetId": "rs-1",
        "version": 5,
        "ruleType": "AUTH",
        "evaluation": {"mode": "FIRST_MATCH"},
        "velocityFailurePolicy": "SKIP",
        "rules": [{
            "ruleId": "r-1",
            "ruleVersionId": "rv-1",
            "priority": 100,
            "when": {"field": "amount", "op": "GT", "value": 3000},
            "action": "DECLINE",
            "scope": {}
        }]
    });

    assert_snapshot!(
        canonical::to_canonical_string(&ast),
        @r###"{"evaluation":{"mode":"FIRST_MATCH"},"ruleType":"AUTH","rules":[{"action":"DECLINE","priority":100,"ruleId":"r-1","ruleVersionId":"rv-1","scope":{},"when":{"field":"amount","op":"GT","value":3000}}],"rulesetId":"rs-1","velocityFailurePolicy":"SKIP","version":5}"###
    );
}

#[test]
fn pointer_canonical_form_is_pinned() {
    let pointer = json!({
        "schema_version": "1.0",
        "environment": "prod",
        "region": "INDIA",
        "country": "IN",
        "ruleset_key": "CARD_AUTH",
        "ruleset_version": 5,
        "artifact_uri": "s3://artifacts/rulesets/prod/INDIA/IN/CARD_AUTH/v5/ruleset.json",
        "checksum": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        "published_at": "2026-01-15T10:00:00.000Z"
    });

    assert_snapshot!(
        canonical::to_canonical_string(&pointer),
        @r###"{"artifact_uri":"s3://artifacts/rulesets/prod/INDIA/IN/CARD_AUTH/v5/ruleset.json","checksum":"sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","country":"IN","environment":"prod","published_at":"2026-01-15T10:00:00.000Z","region":"INDIA","ruleset_key":"CARD_AUTH","ruleset_version":5,"schema_version":"1.0"}"###
    );
}

#[test]
fn error_envelope_shape_is_pinned() {
    let err = GovernanceError::validation_with(
        "operator not allowed for field",
        json!({"field_key": "amount", "operator": "REGEX", "path": "$.op"}),
    );

    assert_snapshot!(
        canonical::to_canonical_string(&err.envelope()),
        @r###"{"details":{"field_key":"amount","operator":"REGEX","path":"$.op"},"error":"ValidationError","message":"operator not allowed for field"}"###
    );
}
