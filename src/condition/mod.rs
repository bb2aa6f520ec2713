//! Condition trees.
//!
//! Rules predicate on a recursive boolean tree over catalog fields. Two
//! wire shapes are accepted — keyword keys (`{"and": [...]}`) and typed
//! objects (`{"type": "AND", "conditions": [...]}`) — and both normalize
//! into one sum type. The canonical artifact always carries the keyword
//! shape.

pub mod validate;

use serde_json::{json, Map, Value};

use crate::database::models::Operator;
use crate::error::GovernanceError;

/// A single comparison operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn from_value(value: &Value, path: &str) -> Result<Self, GovernanceError> {
        match value {
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(structural(path, "number out of representable range"))
                }
            }
            _ => Err(structural(path, "expected a scalar value")),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Leaf operand: a scalar or a caller-ordered list of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl ConditionValue {
    fn from_value(value: &Value, path: &str) -> Result<Self, GovernanceError> {
        match value {
            Value::Array(items) => {
                let scalars = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Scalar::from_value(item, &format!("{}[{}]", path, i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Many(scalars))
            }
            other => Ok(Self::One(Scalar::from_value(other, path)?)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::One(s) => s.to_value(),
            Self::Many(items) => Value::Array(items.iter().map(Scalar::to_value).collect()),
        }
    }
}

/// Normalized predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    And(Vec<ConditionNode>),
    Or(Vec<ConditionNode>),
    Not(Box<ConditionNode>),
    Leaf {
        field: String,
        op: Operator,
        value: ConditionValue,
    },
}

impl ConditionNode {
    /// Parse either wire shape into the normalized tree.
    ///
    /// Structural problems (wrong JSON type, unknown keys, missing members)
    /// fail with a `ValidationError` whose details carry the JSONPath.
    pub fn parse(value: &Value) -> Result<Self, GovernanceError> {
        parse_node(value, "$")
    }

    /// Emit the keyword (canonical) wire shape.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::And(children) => json!({
                "and": children.iter().map(Self::to_wire).collect::<Vec<_>>()
            }),
            Self::Or(children) => json!({
                "or": children.iter().map(Self::to_wire).collect::<Vec<_>>()
            }),
            Self::Not(child) => json!({"not": child.to_wire()}),
            Self::Leaf { field, op, value } => json!({
                "field": field,
                "op": op.as_str(),
                "value": value.to_value(),
            }),
        }
    }
}

fn structural(path: &str, reason: &str) -> GovernanceError {
    GovernanceError::validation_with(
        format!("invalid condition tree: {}", reason),
        json!({"path": path, "reason": reason}),
    )
}

fn parse_children(
    items: &Value,
    path: &str,
    key: &str,
) -> Result<Vec<ConditionNode>, GovernanceError> {
    let list = items
        .as_array()
        .ok_or_else(|| structural(path, "composite operands must be an array"))?;
    list.iter()
        .enumerate()
        .map(|(i, item)| parse_node(item, &format!("{}.{}[{}]", path, key, i)))
        .collect()
}

fn parse_leaf(
    map: &Map<String, Value>,
    path: &str,
    op_key: &str,
) -> Result<ConditionNode, GovernanceError> {
    let field = map
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| structural(&format!("{}.field", path), "leaf requires a field key"))?;
    let op_raw = map
        .get(op_key)
        .and_then(Value::as_str)
        .ok_or_else(|| structural(&format!("{}.{}", path, op_key), "leaf requires an operator"))?;
    let op = Operator::parse(op_raw)
        .map_err(|_| structural(&format!("{}.{}", path, op_key), "unknown operator"))?;
    let raw_value = map
        .get("value")
        .ok_or_else(|| structural(&format!("{}.value", path), "leaf requires a value"))?;
    let value = ConditionValue::from_value(raw_value, &format!("{}.value", path))?;

    Ok(ConditionNode::Leaf {
        field: field.to_string(),
        op,
        value,
    })
}

fn parse_node(value: &Value, path: &str) -> Result<ConditionNode, GovernanceError> {
    let map = value
        .as_object()
        .ok_or_else(|| structural(path, "condition node must be an object"))?;

    // Shape B: typed objects.
    if let Some(kind) = map.get("type").and_then(Value::as_str) {
        return match kind {
            "AND" | "OR" => {
                let conditions = map
                    .get("conditions")
                    .ok_or_else(|| structural(path, "composite requires 'conditions'"))?;
                let children = parse_children(conditions, path, "conditions")?;
                if kind == "AND" {
                    Ok(ConditionNode::And(children))
                } else {
                    Ok(ConditionNode::Or(children))
                }
            }
            "NOT" => {
                let child = map
                    .get("condition")
                    .ok_or_else(|| structural(path, "NOT requires 'condition'"))?;
                Ok(ConditionNode::Not(Box::new(parse_node(
                    child,
                    &format!("{}.condition", path),
                )?)))
            }
            "CONDITION" => parse_leaf(map, path, "operator"),
            other => Err(structural(
                path,
                &format!("unknown condition node type: {}", other),
            )),
        };
    }

    // Shape A: keyword keys.
    if let Some(items) = map.get("and") {
        return Ok(ConditionNode::And(parse_children(items, path, "and")?));
    }
    if let Some(items) = map.get("or") {
        return Ok(ConditionNode::Or(parse_children(items, path, "or")?));
    }
    if let Some(child) = map.get("not") {
        return Ok(ConditionNode::Not(Box::new(parse_node(
            child,
            &format!("{}.not", path),
        )?)));
    }
    if map.contains_key("field") {
        return parse_leaf(map, path, "op");
    }

    Err(structural(path, "unrecognized condition node shape"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keyword_shape() {
        let tree = json!({
            "and": [
                {"field": "amount", "op": "GT", "value": 3000},
                {"or": [
                    {"field": "currency", "op": "EQ", "value": "INR"},
                    {"not": {"field": "mcc", "op": "IN", "value": ["6011", "7995"]}}
                ]}
            ]
        });
        let node = ConditionNode::parse(&tree).unwrap();
        match &node {
            ConditionNode::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn parses_typed_shape_to_same_tree() {
        let keyword = json!({
            "and": [
                {"field": "amount", "op": "GT", "value": 3000},
                {"field": "currency", "op": "EQ", "value": "INR"}
            ]
        });
        let typed = json!({
            "type": "AND",
            "conditions": [
                {"type": "CONDITION", "field": "amount", "operator": "GT", "value": 3000},
                {"type": "CONDITION", "field": "currency", "operator": "EQ", "value": "INR"}
            ]
        });
        assert_eq!(
            ConditionNode::parse(&keyword).unwrap(),
            ConditionNode::parse(&typed).unwrap()
        );
    }

    #[test]
    fn typed_shape_emits_keyword_wire_form() {
        let typed = json!({
            "type": "NOT",
            "condition": {"type": "CONDITION", "field": "amount", "operator": "LTE", "value": 100}
        });
        let wire = ConditionNode::parse(&typed).unwrap().to_wire();
        assert_eq!(
            wire,
            json!({"not": {"field": "amount", "op": "LTE", "value": 100}})
        );
    }

    #[test]
    fn keyword_round_trip_is_unchanged() {
        let tree = json!({
            "or": [
                {"field": "bin", "op": "STARTS_WITH", "value": "4"},
                {"field": "amount", "op": "BETWEEN", "value": [100, 200]}
            ]
        });
        assert_eq!(ConditionNode::parse(&tree).unwrap().to_wire(), tree);
    }

    #[test]
    fn structural_errors_carry_json_path() {
        let tree = json!({"and": [{"field": "amount", "op": "GT"}]});
        let err = ConditionNode::parse(&tree).unwrap_err();
        let envelope = err.envelope();
        assert_eq!(envelope["error"], "ValidationError");
        assert_eq!(envelope["details"]["path"], "$.and[0].value");
    }

    #[test]
    fn non_object_node_is_rejected() {
        let err = ConditionNode::parse(&json!([1, 2])).unwrap_err();
        assert_eq!(err.envelope()["details"]["path"], "$");
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let tree = json!({"field": "amount", "op": "LIKE", "value": 1});
        let err = ConditionNode::parse(&tree).unwrap_err();
        assert_eq!(err.envelope()["details"]["path"], "$.op");
    }
}
