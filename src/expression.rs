//! Boolean predicate trees in the map engine's expression syntax.
//!
//! Expressions serialize to the JSON array form the engine consumes
//! (`["in", ["to-number", ["get", "Council District"]], ["literal", [3, 7]]]`)
//! and can be evaluated against a feature's properties with the same
//! semantics, which is what the tests and the server use to reason about
//! which features a compiled filter admits.

use geojson::JsonObject;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Get(String),
    ToNumber(Box<Expression>),
    Coalesce(Vec<Expression>),
    /// Numeric membership of `needle` in a literal list.
    In { needle: Box<Expression>, values: Vec<f64> },
    GreaterThan(Box<Expression>, Box<Expression>),
    All(Vec<Expression>),
}

impl Expression {
    pub fn get(key: &str) -> Self {
        Self::Get(key.to_string())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn to_number(inner: Expression) -> Self {
        Self::ToNumber(Box::new(inner))
    }

    /// Matches nothing.
    pub fn never() -> Self {
        Self::Literal(Value::Bool(false))
    }

    /// `[">", ["to-number", ["coalesce", ["get", key], 0]], 0]`
    pub fn count_above_zero(key: &str) -> Self {
        Self::GreaterThan(
            Box::new(Self::to_number(Self::Coalesce(vec![Self::get(key), Self::literal(0)]))),
            Box::new(Self::literal(0)),
        )
    }

    /// Numeric membership test on an attribute, tolerant of string-typed numbers.
    pub fn attribute_in(key: &str, values: Vec<f64>) -> Self {
        Self::In {
            needle: Box::new(Self::to_number(Self::get(key))),
            values,
        }
    }

    /// Conjunction of the present parts; `None` when there is nothing to filter on.
    pub fn all_of(parts: impl IntoIterator<Item = Option<Expression>>) -> Option<Self> {
        let mut parts: Vec<Expression> = parts.into_iter().flatten().collect();
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::All(parts)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(value @ (Value::Array(_) | Value::Object(_))) => json!(["literal", value]),
            Self::Literal(value) => value.clone(),
            Self::Get(key) => json!(["get", key]),
            Self::ToNumber(inner) => json!(["to-number", inner.to_json()]),
            Self::Coalesce(items) => {
                let mut out = vec![json!("coalesce")];
                out.extend(items.iter().map(Expression::to_json));
                Value::Array(out)
            }
            Self::In { needle, values } => json!(["in", needle.to_json(), ["literal", values]]),
            Self::GreaterThan(left, right) => json!([">", left.to_json(), right.to_json()]),
            Self::All(items) => {
                let mut out = vec![json!("all")];
                out.extend(items.iter().map(Expression::to_json));
                Value::Array(out)
            }
        }
    }

    /// Evaluates against feature properties. Failed conversions yield `Null`,
    /// which no comparison accepts, mirroring the engine dropping the feature.
    pub fn evaluate(&self, props: &JsonObject) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Get(key) => props.get(key).cloned().unwrap_or(Value::Null),
            Self::ToNumber(inner) => to_number(&inner.evaluate(props)).map_or(Value::Null, Value::from),
            Self::Coalesce(items) => items
                .iter()
                .map(|item| item.evaluate(props))
                .find(|value| !value.is_null())
                .unwrap_or(Value::Null),
            Self::In { needle, values } => {
                let found = needle
                    .evaluate(props)
                    .as_f64()
                    .is_some_and(|n| values.iter().any(|v| *v == n));
                Value::Bool(found)
            }
            Self::GreaterThan(left, right) => {
                let result = match (left.evaluate(props).as_f64(), right.evaluate(props).as_f64()) {
                    (Some(l), Some(r)) => l > r,
                    _ => false,
                };
                Value::Bool(result)
            }
            Self::All(items) => Value::Bool(items.iter().all(|item| item.matches(props))),
        }
    }

    pub fn matches(&self, props: &JsonObject) -> bool {
        self.evaluate(props).as_bool().unwrap_or(false)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn count_above_zero_serializes_like_the_engine_expects() {
        assert_eq!(
            Expression::count_above_zero("No. of Showers").to_json(),
            json!([">", ["to-number", ["coalesce", ["get", "No. of Showers"], 0]], 0])
        );
    }

    #[test]
    fn count_above_zero_treats_missing_as_zero() {
        let expr = Expression::count_above_zero("No. of Showers");
        assert!(!expr.matches(&props(json!({}))));
        assert!(!expr.matches(&props(json!({ "No. of Showers": "0" }))));
        assert!(expr.matches(&props(json!({ "No. of Showers": "2" }))));
        assert!(!expr.matches(&props(json!({ "No. of Showers": "n/a" }))));
    }

    #[test]
    fn attribute_in_compares_numerically() {
        let expr = Expression::attribute_in("Council District", vec![3.0, 7.0]);
        assert_eq!(
            expr.to_json(),
            json!(["in", ["to-number", ["get", "Council District"]], ["literal", [3.0, 7.0]]])
        );
        assert!(expr.matches(&props(json!({ "Council District": 3 }))));
        assert!(expr.matches(&props(json!({ "Council District": "7" }))));
        assert!(!expr.matches(&props(json!({ "Council District": "4" }))));
        assert!(!expr.matches(&props(json!({}))));
    }

    #[test]
    fn all_of_collapses_trivial_conjunctions() {
        assert_eq!(Expression::all_of([None, None]), None);
        assert_eq!(Expression::all_of([None, Some(Expression::never())]), Some(Expression::never()));
        let both = Expression::all_of([Some(Expression::never()), Some(Expression::literal(true))]).unwrap();
        assert_eq!(both.to_json(), json!(["all", false, true]));
        assert!(!both.matches(&JsonObject::new()));
    }

    #[test]
    fn never_matches_nothing() {
        assert_eq!(Expression::never().to_json(), json!(false));
        assert!(!Expression::never().matches(&props(json!({ "Council District": 1 }))));
    }
}
