//! Condition-tree validation against the active field catalog.

use chrono::DateTime;
use serde_json::json;
use std::collections::HashMap;

use crate::catalog::FieldMeta;
use crate::condition::{ConditionNode, ConditionValue, Scalar};
use crate::database::models::{DataType, Operator};
use crate::error::GovernanceError;

/// Validate a normalized tree against the active catalog.
///
/// Paths in error details use the keyword (shape A) form of the tree.
pub fn validate_tree(
    node: &ConditionNode,
    catalog: &HashMap<String, FieldMeta>,
) -> Result<(), GovernanceError> {
    walk(node, catalog, "$")
}

fn walk(
    node: &ConditionNode,
    catalog: &HashMap<String, FieldMeta>,
    path: &str,
) -> Result<(), GovernanceError> {
    match node {
        ConditionNode::And(children) | ConditionNode::Or(children) => {
            let key = match node {
                ConditionNode::And(_) => "and",
                _ => "or",
            };
            if children.is_empty() {
                return Err(semantic(path, "composite requires at least one condition", None));
            }
            for (i, child) in children.iter().enumerate() {
                walk(child, catalog, &format!("{}.{}[{}]", path, key, i))?;
            }
            Ok(())
        }
        ConditionNode::Not(child) => walk(child, catalog, &format!("{}.not", path)),
        ConditionNode::Leaf { field, op, value } => validate_leaf(field, *op, value, catalog, path),
    }
}

fn validate_leaf(
    field: &str,
    op: Operator,
    value: &ConditionValue,
    catalog: &HashMap<String, FieldMeta>,
    path: &str,
) -> Result<(), GovernanceError> {
    let meta = catalog.get(field).ok_or_else(|| {
        semantic(
            &format!("{}.field", path),
            "unknown or inactive field",
            Some(json!({"field_key": field})),
        )
    })?;

    if !meta.allowed_operators.contains(&op) {
        return Err(semantic(
            &format!("{}.op", path),
            "operator not allowed for field",
            Some(json!({"field_key": field, "operator": op.as_str()})),
        ));
    }

    let value_path = format!("{}.value", path);
    match op {
        Operator::In | Operator::NotIn => {
            let items = match value {
                ConditionValue::Many(items) if !items.is_empty() => items,
                ConditionValue::Many(_) => {
                    return Err(semantic(
                        &value_path,
                        "IN/NOT_IN require a non-empty array",
                        Some(json!({"field_key": field, "operator": op.as_str()})),
                    ))
                }
                ConditionValue::One(_) => {
                    return Err(semantic(
                        &value_path,
                        "IN/NOT_IN require an array value",
                        Some(json!({"field_key": field, "operator": op.as_str()})),
                    ))
                }
            };
            if !meta.multi_value_allowed {
                return Err(semantic(
                    &value_path,
                    "field does not allow multi-value operators",
                    Some(json!({"field_key": field, "operator": op.as_str()})),
                ));
            }
            for (i, item) in items.iter().enumerate() {
                check_scalar(item, meta, &format!("{}[{}]", value_path, i))?;
            }
            Ok(())
        }
        Operator::Between => {
            let items = match value {
                ConditionValue::Many(items) if items.len() == 2 => items,
                _ => {
                    return Err(semantic(
                        &value_path,
                        "BETWEEN requires an array of exactly two values",
                        Some(json!({"field_key": field})),
                    ))
                }
            };
            check_scalar(&items[0], meta, &format!("{}[0]", value_path))?;
            check_scalar(&items[1], meta, &format!("{}[1]", value_path))?;
            if !bounds_ordered(&items[0], &items[1], meta.data_type) {
                return Err(semantic(
                    &value_path,
                    "BETWEEN bounds must be ordered low to high",
                    Some(json!({"field_key": field})),
                ));
            }
            Ok(())
        }
        _ => {
            let scalar = match value {
                ConditionValue::One(s) => s,
                ConditionValue::Many(_) => {
                    return Err(semantic(
                        &value_path,
                        "operator requires a scalar value",
                        Some(json!({"field_key": field, "operator": op.as_str()})),
                    ))
                }
            };
            check_scalar(scalar, meta, &value_path)?;
            if op == Operator::Regex {
                if let Scalar::Str(pattern) = scalar {
                    regex::Regex::new(pattern).map_err(|e| {
                        semantic(
                            &value_path,
                            "invalid regular expression",
                            Some(json!({"field_key": field, "reason": e.to_string()})),
                        )
                    })?;
                }
            }
            Ok(())
        }
    }
}

fn check_scalar(scalar: &Scalar, meta: &FieldMeta, path: &str) -> Result<(), GovernanceError> {
    let ok = match meta.data_type {
        DataType::String => matches!(scalar, Scalar::Str(_)),
        DataType::Number => matches!(scalar, Scalar::Int(_) | Scalar::Float(_)),
        DataType::Boolean => matches!(scalar, Scalar::Bool(_)),
        DataType::Date => match scalar {
            Scalar::Str(s) => DateTime::parse_from_rfc3339(s).is_ok(),
            _ => false,
        },
        DataType::Enum => match scalar {
            Scalar::Str(s) => {
                let allowed = meta.enum_values.as_ref().ok_or_else(|| {
                    semantic(
                        path,
                        "enum field has no value set defined",
                        Some(json!({"field_key": meta.field_key})),
                    )
                })?;
                if !allowed.iter().any(|v| v == s) {
                    return Err(semantic(
                        path,
                        "value not in enum set",
                        Some(json!({"field_key": meta.field_key, "value": s})),
                    ));
                }
                true
            }
            _ => false,
        },
    };

    if ok {
        Ok(())
    } else {
        Err(semantic(
            path,
            "value does not match field data type",
            Some(json!({
                "field_key": meta.field_key,
                "data_type": meta.data_type.as_str(),
            })),
        ))
    }
}

fn bounds_ordered(low: &Scalar, high: &Scalar, data_type: DataType) -> bool {
    match data_type {
        DataType::Number => {
            let l = match low {
                Scalar::Int(i) => *i as f64,
                Scalar::Float(f) => *f,
                _ => return false,
            };
            let h = match high {
                Scalar::Int(i) => *i as f64,
                Scalar::Float(f) => *f,
                _ => return false,
            };
            l <= h
        }
        DataType::String | DataType::Enum => match (low, high) {
            (Scalar::Str(l), Scalar::Str(h)) => l <= h,
            _ => false,
        },
        DataType::Date => match (low, high) {
            (Scalar::Str(l), Scalar::Str(h)) => {
                match (DateTime::parse_from_rfc3339(l), DateTime::parse_from_rfc3339(h)) {
                    (Ok(l), Ok(h)) => l <= h,
                    _ => false,
                }
            }
            _ => false,
        },
        DataType::Boolean => !matches!((low, high), (Scalar::Bool(true), Scalar::Bool(false))),
    }
}

fn semantic(path: &str, reason: &str, extra: Option<serde_json::Value>) -> GovernanceError {
    let mut details = json!({"path": path, "reason": reason});
    if let Some(serde_json::Value::Object(map)) = extra {
        for (k, v) in map {
            details[k] = v;
        }
    }
    GovernanceError::validation_with(format!("invalid condition tree: {}", reason), details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(
        key: &str,
        data_type: DataType,
        operators: &[Operator],
        multi: bool,
    ) -> FieldMeta {
        FieldMeta {
            field_key: key.to_string(),
            field_id: 1,
            display_name: key.to_string(),
            data_type,
            allowed_operators: operators.to_vec(),
            multi_value_allowed: multi,
            is_sensitive: false,
            version: 1,
            enum_values: None,
        }
    }

    fn catalog() -> HashMap<String, FieldMeta> {
        let mut fields = HashMap::new();
        fields.insert(
            "amount".to_string(),
            meta(
                "amount",
                DataType::Number,
                &[Operator::Gt, Operator::Lt, Operator::Between],
                false,
            ),
        );
        fields.insert(
            "mcc".to_string(),
            meta(
                "mcc",
                DataType::String,
                &[Operator::Eq, Operator::In, Operator::Regex],
                true,
            ),
        );
        let mut network = meta("network", DataType::Enum, &[Operator::Eq], false);
        network.enum_values = Some(vec!["VISA".to_string(), "MASTERCARD".to_string()]);
        fields.insert("network".to_string(), network);
        fields
    }

    fn parse(tree: serde_json::Value) -> ConditionNode {
        ConditionNode::parse(&tree).unwrap()
    }

    #[test]
    fn accepts_well_typed_tree() {
        let tree = parse(json!({
            "and": [
                {"field": "amount", "op": "GT", "value": 3000},
                {"field": "mcc", "op": "IN", "value": ["6011", "7995"]}
            ]
        }));
        assert!(validate_tree(&tree, &catalog()).is_ok());
    }

    #[test]
    fn rejects_unknown_field_with_path() {
        let tree = parse(json!({"and": [{"field": "ghost", "op": "EQ", "value": 1}]}));
        let err = validate_tree(&tree, &catalog()).unwrap_err();
        let details = &err.envelope()["details"];
        assert_eq!(details["path"], "$.and[0].field");
        assert_eq!(details["field_key"], "ghost");
    }

    #[test]
    fn rejects_disallowed_operator() {
        let tree = parse(json!({"field": "amount", "op": "EQ", "value": 5}));
        let err = validate_tree(&tree, &catalog()).unwrap_err();
        assert_eq!(err.envelope()["details"]["operator"], "EQ");
    }

    #[test]
    fn rejects_type_mismatch() {
        let tree = parse(json!({"field": "amount", "op": "GT", "value": "high"}));
        let err = validate_tree(&tree, &catalog()).unwrap_err();
        assert_eq!(err.envelope()["details"]["data_type"], "NUMBER");
    }

    #[test]
    fn rejects_empty_composite() {
        let tree = parse(json!({"or": []}));
        let err = validate_tree(&tree, &catalog()).unwrap_err();
        assert_eq!(err.envelope()["details"]["path"], "$");
    }

    #[test]
    fn rejects_in_without_multi_value_allowance() {
        let mut fields = catalog();
        fields.get_mut("mcc").unwrap().multi_value_allowed = false;
        let tree = parse(json!({"field": "mcc", "op": "IN", "value": ["6011"]}));
        let err = validate_tree(&tree, &fields).unwrap_err();
        assert_eq!(
            err.envelope()["details"]["reason"],
            "field does not allow multi-value operators"
        );
    }

    #[test]
    fn rejects_empty_in_list() {
        let tree = parse(json!({"field": "mcc", "op": "IN", "value": []}));
        assert!(validate_tree(&tree, &catalog()).is_err());
    }

    #[test]
    fn between_requires_two_ordered_bounds() {
        let ok = parse(json!({"field": "amount", "op": "BETWEEN", "value": [100, 200]}));
        assert!(validate_tree(&ok, &catalog()).is_ok());

        let unordered = parse(json!({"field": "amount", "op": "BETWEEN", "value": [200, 100]}));
        assert!(validate_tree(&unordered, &catalog()).is_err());

        let arity = parse(json!({"field": "amount", "op": "BETWEEN", "value": [100]}));
        assert!(validate_tree(&arity, &catalog()).is_err());
    }

    #[test]
    fn enum_values_are_checked() {
        let ok = parse(json!({"field": "network", "op": "EQ", "value": "VISA"}));
        assert!(validate_tree(&ok, &catalog()).is_ok());

        let bad = parse(json!({"field": "network", "op": "EQ", "value": "AMEX"}));
        let err = validate_tree(&bad, &catalog()).unwrap_err();
        assert_eq!(err.envelope()["details"]["reason"], "value not in enum set");
    }

    #[test]
    fn regex_pattern_must_compile() {
        let bad = parse(json!({"field": "mcc", "op": "REGEX", "value": "("}));
        assert!(validate_tree(&bad, &catalog()).is_err());

        let ok = parse(json!({"field": "mcc", "op": "REGEX", "value": "^6[0-9]{3}$"}));
        assert!(validate_tree(&ok, &catalog()).is_ok());
    }

    #[test]
    fn single_value_operator_rejects_arrays() {
        let tree = parse(json!({"field": "amount", "op": "GT", "value": [1, 2]}));
        let err = validate_tree(&tree, &catalog()).unwrap_err();
        assert_eq!(
            err.envelope()["details"]["reason"],
            "operator requires a scalar value"
        );
    }
}
