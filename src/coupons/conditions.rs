//! Typed interpreter for template eligibility conditions.
//!
//! Conditions are stored as JSONB on the template: an array of tagged
//! operator objects, e.g.
//! `[{"op": "gte", "field": "level_order", "value": 2}]`. The legacy
//! shorthand object form (`{"min_level": 2, "gender": "female"}`) is still
//! accepted and normalized into the tagged form. Unknown operators or fields
//! are a configuration error, never a silent no-op.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ApiError;
use crate::loyalty::Gender;

/// Client attribute a condition tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    LevelOrder,
    Gender,
    TotalSpent,
    Tags,
}

impl ConditionField {
    fn as_str(&self) -> &'static str {
        match self {
            ConditionField::LevelOrder => "level_order",
            ConditionField::Gender => "gender",
            ConditionField::TotalSpent => "total_spent",
            ConditionField::Tags => "tags",
        }
    }
}

/// One eligibility predicate. The supported operator set is closed; anything
/// else fails deserialization and surfaces as `InvalidRuleConfig`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq {
        field: ConditionField,
        value: serde_json::Value,
    },
    Ne {
        field: ConditionField,
        value: serde_json::Value,
    },
    Gt {
        field: ConditionField,
        value: serde_json::Value,
    },
    Gte {
        field: ConditionField,
        value: serde_json::Value,
    },
    Lt {
        field: ConditionField,
        value: serde_json::Value,
    },
    Lte {
        field: ConditionField,
        value: serde_json::Value,
    },
    In {
        field: ConditionField,
        values: Vec<serde_json::Value>,
    },
    Contains {
        field: ConditionField,
        value: serde_json::Value,
    },
}

/// Client attributes the interpreter evaluates against
#[derive(Debug, Clone)]
pub struct ConditionContext<'a> {
    /// Rank of the client's current level, if any
    pub level_order: Option<i32>,
    pub gender: Gender,
    pub total_spent: Decimal,
    pub tags: &'a serde_json::Value,
}

/// Resolved value of a context field
enum FieldValue {
    Number(Decimal),
    Text(String),
    Map(serde_json::Map<String, serde_json::Value>),
    Missing(&'static str),
}

fn resolve(field: ConditionField, ctx: &ConditionContext<'_>) -> FieldValue {
    match field {
        ConditionField::LevelOrder => match ctx.level_order {
            Some(order) => FieldValue::Number(Decimal::from(order)),
            None => FieldValue::Missing("client has no loyalty level"),
        },
        ConditionField::Gender => FieldValue::Text(ctx.gender.as_str().to_string()),
        ConditionField::TotalSpent => FieldValue::Number(ctx.total_spent),
        ConditionField::Tags => match ctx.tags.as_object() {
            Some(map) => FieldValue::Map(map.clone()),
            None => FieldValue::Map(serde_json::Map::new()),
        },
    }
}

fn expected_number(field: ConditionField, value: &serde_json::Value) -> Result<Decimal, ApiError> {
    value
        .as_i64()
        .map(Decimal::from)
        .or_else(|| value.as_f64().and_then(Decimal::from_f64_retain))
        .ok_or_else(|| ApiError::InvalidRuleConfig {
            reason: format!("{} condition expects a numeric value", field.as_str()),
        })
}

fn expected_text(field: ConditionField, value: &serde_json::Value) -> Result<String, ApiError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::InvalidRuleConfig {
            reason: format!("{} condition expects a string value", field.as_str()),
        })
}

/// Parse the raw JSONB column into the closed condition set
pub fn parse(raw: &serde_json::Value) -> Result<Vec<Condition>, ApiError> {
    match raw {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(_) => {
            serde_json::from_value(raw.clone()).map_err(|e| ApiError::InvalidRuleConfig {
                reason: format!("bad condition expression: {}", e),
            })
        }
        serde_json::Value::Object(map) => {
            // Legacy shorthand form used by older template rows.
            let mut conditions = Vec::new();
            for (key, value) in map {
                match key.as_str() {
                    "min_level" => conditions.push(Condition::Gte {
                        field: ConditionField::LevelOrder,
                        value: value.clone(),
                    }),
                    "gender" => conditions.push(Condition::Eq {
                        field: ConditionField::Gender,
                        value: value.clone(),
                    }),
                    other => {
                        return Err(ApiError::InvalidRuleConfig {
                            reason: format!("unknown condition key: {}", other),
                        })
                    }
                }
            }
            Ok(conditions)
        }
        _ => Err(ApiError::InvalidRuleConfig {
            reason: "conditions must be an array or object".to_string(),
        }),
    }
}

/// Evaluate all conditions; the first unmet one aborts with
/// `CouponConditionsNotMet` carrying the specific reason.
pub fn evaluate(raw: &serde_json::Value, ctx: &ConditionContext<'_>) -> Result<(), ApiError> {
    for condition in parse(raw)? {
        if let Some(reason) = check(&condition, ctx)? {
            return Err(ApiError::CouponConditionsNotMet { reason });
        }
    }
    Ok(())
}

/// Check a single condition. `Ok(None)` means satisfied; `Ok(Some(reason))`
/// an unmet condition; `Err` a configuration problem.
fn check(condition: &Condition, ctx: &ConditionContext<'_>) -> Result<Option<String>, ApiError> {
    match condition {
        Condition::Eq { field, value } => check_eq(*field, value, ctx, false),
        Condition::Ne { field, value } => check_eq(*field, value, ctx, true),
        Condition::Gt { field, value } => check_ord(*field, value, ctx, ">", |a, b| a > b),
        Condition::Gte { field, value } => check_ord(*field, value, ctx, ">=", |a, b| a >= b),
        Condition::Lt { field, value } => check_ord(*field, value, ctx, "<", |a, b| a < b),
        Condition::Lte { field, value } => check_ord(*field, value, ctx, "<=", |a, b| a <= b),
        Condition::In { field, values } => check_in(*field, values, ctx),
        Condition::Contains { field, value } => check_contains(*field, value, ctx),
    }
}

fn check_eq(
    field: ConditionField,
    value: &serde_json::Value,
    ctx: &ConditionContext<'_>,
    negated: bool,
) -> Result<Option<String>, ApiError> {
    let matches = match resolve(field, ctx) {
        FieldValue::Number(actual) => actual == expected_number(field, value)?,
        FieldValue::Text(actual) => actual == expected_text(field, value)?,
        FieldValue::Missing(reason) => return Ok(Some(reason.to_string())),
        FieldValue::Map(_) => {
            return Err(ApiError::InvalidRuleConfig {
                reason: format!("{} does not support equality checks", field.as_str()),
            })
        }
    };

    if matches != negated {
        Ok(None)
    } else {
        let op = if negated { "!=" } else { "==" };
        Ok(Some(format!("{} {} {} not satisfied", field.as_str(), op, value)))
    }
}

fn check_ord(
    field: ConditionField,
    value: &serde_json::Value,
    ctx: &ConditionContext<'_>,
    op: &str,
    cmp: fn(Decimal, Decimal) -> bool,
) -> Result<Option<String>, ApiError> {
    let expected = expected_number(field, value)?;
    match resolve(field, ctx) {
        FieldValue::Number(actual) if cmp(actual, expected) => Ok(None),
        FieldValue::Number(_) => Ok(Some(format!(
            "{} {} {} not satisfied",
            field.as_str(),
            op,
            expected
        ))),
        FieldValue::Missing(reason) => Ok(Some(reason.to_string())),
        _ => Err(ApiError::InvalidRuleConfig {
            reason: format!("{} does not support ordering comparisons", field.as_str()),
        }),
    }
}

fn check_in(
    field: ConditionField,
    values: &[serde_json::Value],
    ctx: &ConditionContext<'_>,
) -> Result<Option<String>, ApiError> {
    let found = match resolve(field, ctx) {
        FieldValue::Text(actual) => values.iter().any(|v| v.as_str() == Some(actual.as_str())),
        FieldValue::Number(actual) => {
            // A malformed entry in the set is a configuration error, not a
            // value that silently never matches.
            let expected = values
                .iter()
                .map(|v| expected_number(field, v))
                .collect::<Result<Vec<_>, _>>()?;
            expected.contains(&actual)
        }
        FieldValue::Missing(reason) => return Ok(Some(reason.to_string())),
        FieldValue::Map(_) => {
            return Err(ApiError::InvalidRuleConfig {
                reason: format!("{} does not support set membership", field.as_str()),
            })
        }
    };

    if found {
        Ok(None)
    } else {
        Ok(Some(format!(
            "{} not in the allowed set",
            field.as_str()
        )))
    }
}

fn check_contains(
    field: ConditionField,
    value: &serde_json::Value,
    ctx: &ConditionContext<'_>,
) -> Result<Option<String>, ApiError> {
    let key = expected_text(field, value)?;
    match resolve(field, ctx) {
        FieldValue::Map(map) if map.contains_key(&key) => Ok(None),
        FieldValue::Map(_) => Ok(Some(format!("{} does not contain '{}'", field.as_str(), key))),
        FieldValue::Text(actual) if actual.contains(&key) => Ok(None),
        FieldValue::Text(_) => Ok(Some(format!("{} does not contain '{}'", field.as_str(), key))),
        FieldValue::Missing(reason) => Ok(Some(reason.to_string())),
        FieldValue::Number(_) => Err(ApiError::InvalidRuleConfig {
            reason: format!("{} does not support containment checks", field.as_str()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn ctx(tags: &serde_json::Value) -> ConditionContext<'_> {
        ConditionContext {
            level_order: Some(2),
            gender: Gender::Female,
            total_spent: dec!(1500),
            tags,
        }
    }

    #[test]
    fn test_empty_conditions_pass() {
        let tags = json!({});
        assert!(evaluate(&json!([]), &ctx(&tags)).is_ok());
        assert!(evaluate(&json!({}), &ctx(&tags)).is_ok());
        assert!(evaluate(&serde_json::Value::Null, &ctx(&tags)).is_ok());
    }

    #[test]
    fn test_legacy_min_level_met() {
        let tags = json!({});
        let raw = json!({"min_level": 2});
        assert!(evaluate(&raw, &ctx(&tags)).is_ok());
    }

    #[test]
    fn test_legacy_min_level_too_low() {
        let tags = json!({});
        let raw = json!({"min_level": 3});
        let err = evaluate(&raw, &ctx(&tags)).unwrap_err();
        assert!(matches!(err, ApiError::CouponConditionsNotMet { .. }));
    }

    #[test]
    fn test_legacy_min_level_without_level() {
        let tags = json!({});
        let mut context = ctx(&tags);
        context.level_order = None;
        let raw = json!({"min_level": 1});
        let err = evaluate(&raw, &context).unwrap_err();
        match err {
            ApiError::CouponConditionsNotMet { reason } => {
                assert!(reason.contains("no loyalty level"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_legacy_gender_mismatch() {
        let tags = json!({});
        let raw = json!({"gender": "male"});
        let err = evaluate(&raw, &ctx(&tags)).unwrap_err();
        assert!(matches!(err, ApiError::CouponConditionsNotMet { .. }));
    }

    #[test]
    fn test_legacy_unknown_key_is_config_error() {
        let tags = json!({});
        let raw = json!({"shoe_size": 42});
        let err = evaluate(&raw, &ctx(&tags)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRuleConfig { .. }));
    }

    #[test]
    fn test_tagged_gte_total_spent() {
        let tags = json!({});
        let raw = json!([{"op": "gte", "field": "total_spent", "value": 1000}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_ok());

        let raw = json!([{"op": "gte", "field": "total_spent", "value": 2000}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_err());
    }

    #[test]
    fn test_tagged_unknown_operator_is_config_error() {
        let tags = json!({});
        let raw = json!([{"op": "xor", "field": "gender", "value": "female"}]);
        let err = evaluate(&raw, &ctx(&tags)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRuleConfig { .. }));
    }

    #[test]
    fn test_tagged_in_membership() {
        let tags = json!({});
        let raw = json!([{"op": "in", "field": "gender", "values": ["female", "other"]}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_ok());

        let raw = json!([{"op": "in", "field": "gender", "values": ["male"]}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_err());
    }

    #[test]
    fn test_tagged_in_numeric_membership() {
        let tags = json!({});
        let raw = json!([{"op": "in", "field": "level_order", "values": [1, 2, 3]}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_ok());

        let raw = json!([{"op": "in", "field": "level_order", "values": [4, 5]}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_err());
    }

    #[test]
    fn test_tagged_in_malformed_entry_is_config_error() {
        let tags = json!({});
        // "two" cannot be compared against a numeric field; the whole set is
        // rejected rather than the entry being skipped.
        let raw = json!([{"op": "in", "field": "level_order", "values": [1, "two", 3]}]);
        let err = evaluate(&raw, &ctx(&tags)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRuleConfig { .. }));
    }

    #[test]
    fn test_tagged_tag_containment() {
        let tags = json!({"vip": true});
        let raw = json!([{"op": "contains", "field": "tags", "value": "vip"}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_ok());

        let raw = json!([{"op": "contains", "field": "tags", "value": "birthday"}]);
        assert!(evaluate(&raw, &ctx(&tags)).is_err());
    }

    #[test]
    fn test_first_failing_condition_reports_reason() {
        let tags = json!({});
        let raw = json!([
            {"op": "eq", "field": "gender", "value": "female"},
            {"op": "gte", "field": "level_order", "value": 5}
        ]);
        match evaluate(&raw, &ctx(&tags)).unwrap_err() {
            ApiError::CouponConditionsNotMet { reason } => {
                assert!(reason.contains("level_order"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let tags = json!({});
        let raw = json!([{"op": "gte", "field": "gender", "value": 2}]);
        let err = evaluate(&raw, &ctx(&tags)).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRuleConfig { .. }));
    }
}
