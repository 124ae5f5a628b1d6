//! Target-type descriptions for dynamic property evaluation.
//!
//! A `TypeHint` tells the evaluator what shape a schema value must take. Rust
//! types that can be produced from schema values implement [`Evaluable`], which
//! pairs a hint with serde deserialization: the evaluator shapes a JSON value
//! according to the hint, then serde builds the typed value.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

// ---------------------------------------------------------------------------
// TypeHint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TypeHint {
    /// No constraint; values pass through untouched.
    Any,
    Bool,
    Int,
    Float,
    String,
    /// Closed set of names. Matching is case-insensitive; the canonical name is produced.
    Enum {
        name: &'static str,
        variants: &'static [&'static str],
    },
    Array(Box<TypeHint>),
    /// String-keyed dictionary with uniform values.
    Map(Box<TypeHint>),
    /// Record with a fixed set of fields. Undeclared fields are rejected.
    Object {
        name: &'static str,
        fields: Vec<(&'static str, TypeHint)>,
    },
}

/// How strictly scalars are matched against a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conformance {
    /// Expression results: the produced type must already match.
    Strict,
    /// Literals and external results: parse or stringify scalars where sensible.
    Lenient,
}

impl TypeHint {
    pub fn array(inner: TypeHint) -> Self {
        TypeHint::Array(Box::new(inner))
    }

    pub fn map(inner: TypeHint) -> Self {
        TypeHint::Map(Box::new(inner))
    }

    /// Parse an embedded expression hint such as `int` or `string`.
    pub fn parse_embedded(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "any" | "dynamic" | "object" => Some(TypeHint::Any),
            "bool" | "boolean" => Some(TypeHint::Bool),
            "int" | "long" | "integer" => Some(TypeHint::Int),
            "float" | "double" | "number" => Some(TypeHint::Float),
            "string" | "str" => Some(TypeHint::String),
            "array" | "list" => Some(TypeHint::array(TypeHint::Any)),
            "map" | "dictionary" => Some(TypeHint::map(TypeHint::Any)),
            _ => None,
        }
    }

    /// Look up the declared hint of an object field.
    pub fn field(&self, field: &str) -> Option<&TypeHint> {
        match self {
            TypeHint::Object { fields, .. } => {
                fields.iter().find(|(name, _)| *name == field).map(|(_, hint)| hint)
            }
            _ => None,
        }
    }

    /// Shape `value` to this hint, or describe why it cannot be.
    ///
    /// `null` conforms to every hint; whether it is acceptable is left to the
    /// typed sink.
    pub fn conform(&self, value: Value, mode: Conformance) -> Result<Value, HintMismatch> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            TypeHint::Any => Ok(value),
            TypeHint::Bool => match value {
                Value::Bool(_) => Ok(value),
                Value::String(ref s) if mode == Conformance::Lenient => {
                    match s.trim().to_ascii_lowercase().as_str() {
                        "true" => Ok(Value::Bool(true)),
                        "false" => Ok(Value::Bool(false)),
                        _ => Err(HintMismatch::new(self, &value)),
                    }
                }
                other => Err(HintMismatch::new(self, &other)),
            },
            TypeHint::Int => match &value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(HintMismatch::new(self, &value)),
                },
                Value::String(s) if mode == Conformance::Lenient => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| HintMismatch::new(self, &value)),
                _ => Err(HintMismatch::new(self, &value)),
            },
            TypeHint::Float => match &value {
                Value::Number(n) => n
                    .as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| HintMismatch::new(self, &value)),
                Value::String(s) if mode == Conformance::Lenient => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| HintMismatch::new(self, &value)),
                _ => Err(HintMismatch::new(self, &value)),
            },
            TypeHint::String => match value {
                Value::String(_) => Ok(value),
                Value::Number(_) | Value::Bool(_) if mode == Conformance::Lenient => {
                    Ok(Value::String(value.to_string()))
                }
                other => Err(HintMismatch::new(self, &other)),
            },
            TypeHint::Enum { variants, .. } => {
                let matched = match &value {
                    Value::String(s) => variants
                        .iter()
                        .find(|v| v.eq_ignore_ascii_case(s.trim()))
                        .copied(),
                    Value::Number(n) => n
                        .as_u64()
                        .and_then(|i| variants.get(i as usize))
                        .copied(),
                    _ => None,
                };
                matched
                    .map(|v| Value::String(v.to_string()))
                    .ok_or_else(|| HintMismatch::new(self, &value))
            }
            TypeHint::Array(inner) => match value {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| inner.conform(item, mode))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(HintMismatch::new(self, &other)),
            },
            TypeHint::Map(inner) => match value {
                Value::Object(map) => map
                    .into_iter()
                    .map(|(k, v)| inner.conform(v, mode).map(|v| (k, v)))
                    .collect::<Result<serde_json::Map<_, _>, _>>()
                    .map(Value::Object),
                other => Err(HintMismatch::new(self, &other)),
            },
            TypeHint::Object { name, .. } => match value {
                Value::Object(map) => {
                    let mut shaped = serde_json::Map::with_capacity(map.len());
                    for (key, v) in map {
                        let hint = self.field(&key).ok_or_else(|| HintMismatch {
                            expected: self.to_string(),
                            found: format!("undeclared field '{key}' on {name}"),
                        })?;
                        shaped.insert(key, hint.conform(v, mode)?);
                    }
                    Ok(Value::Object(shaped))
                }
                other => Err(HintMismatch::new(self, &other)),
            },
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHint::Any => write!(f, "any"),
            TypeHint::Bool => write!(f, "bool"),
            TypeHint::Int => write!(f, "int"),
            TypeHint::Float => write!(f, "float"),
            TypeHint::String => write!(f, "string"),
            TypeHint::Enum { name, .. } => write!(f, "enum {name}"),
            TypeHint::Array(inner) => write!(f, "array<{inner}>"),
            TypeHint::Map(inner) => write!(f, "map<{inner}>"),
            TypeHint::Object { name, .. } => write!(f, "object {name}"),
        }
    }
}

/// A value did not fit its declared hint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct HintMismatch {
    pub expected: String,
    pub found: String,
}

impl HintMismatch {
    fn new(hint: &TypeHint, value: &Value) -> Self {
        Self {
            expected: hint.to_string(),
            found: describe(value),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string '{s}'"),
        Value::Array(items) => format!("array of {}", items.len()),
        Value::Object(_) => "object".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Evaluable
// ---------------------------------------------------------------------------

/// A Rust type the evaluator can produce from a schema value.
pub trait Evaluable: DeserializeOwned + Send + 'static {
    fn type_hint() -> TypeHint;
}

macro_rules! evaluable_scalar {
    ($hint:expr => $($ty:ty),+) => {
        $(impl Evaluable for $ty {
            fn type_hint() -> TypeHint {
                $hint
            }
        })+
    };
}

evaluable_scalar!(TypeHint::Bool => bool);
evaluable_scalar!(TypeHint::Int => i32, i64, u32, u64, usize);
evaluable_scalar!(TypeHint::Float => f32, f64);
evaluable_scalar!(TypeHint::String => String);
evaluable_scalar!(TypeHint::Any => Value, ());

impl<T: Evaluable> Evaluable for Option<T> {
    fn type_hint() -> TypeHint {
        T::type_hint()
    }
}

impl<T: Evaluable> Evaluable for Vec<T> {
    fn type_hint() -> TypeHint {
        TypeHint::array(T::type_hint())
    }
}

impl<T: Evaluable> Evaluable for HashMap<String, T> {
    fn type_hint() -> TypeHint {
        TypeHint::map(T::type_hint())
    }
}

impl<T: Evaluable> Evaluable for BTreeMap<String, T> {
    fn type_hint() -> TypeHint {
        TypeHint::map(T::type_hint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLORS: &[&str] = &["Red", "Green", "Blue"];

    fn color() -> TypeHint {
        TypeHint::Enum {
            name: "Color",
            variants: COLORS,
        }
    }

    #[test]
    fn strict_rejects_string_for_int() {
        let err = TypeHint::Int
            .conform(json!("12"), Conformance::Strict)
            .unwrap_err();
        assert_eq!(err.expected, "int");
        assert_eq!(
            TypeHint::Int.conform(json!("12"), Conformance::Lenient).unwrap(),
            json!(12)
        );
    }

    #[test]
    fn whole_floats_are_accepted_as_int() {
        assert_eq!(
            TypeHint::Int.conform(json!(3.0), Conformance::Strict).unwrap(),
            json!(3)
        );
        assert!(TypeHint::Int.conform(json!(3.5), Conformance::Strict).is_err());
    }

    #[test]
    fn enum_matches_case_insensitively_and_by_index() {
        assert_eq!(
            color().conform(json!("green"), Conformance::Strict).unwrap(),
            json!("Green")
        );
        assert_eq!(
            color().conform(json!(2), Conformance::Strict).unwrap(),
            json!("Blue")
        );
        assert!(color().conform(json!("Purple"), Conformance::Strict).is_err());
    }

    #[test]
    fn object_rejects_undeclared_fields() {
        let hint = TypeHint::Object {
            name: "Probe",
            fields: vec![("Url", TypeHint::String), ("Retries", TypeHint::Int)],
        };
        let ok = hint
            .conform(json!({"Url": "http://x", "Retries": "2"}), Conformance::Lenient)
            .unwrap();
        assert_eq!(ok, json!({"Url": "http://x", "Retries": 2}));

        let err = hint
            .conform(json!({"Url": "http://x", "Bogus": 1}), Conformance::Lenient)
            .unwrap_err();
        assert!(err.found.contains("Bogus"));
    }

    #[test]
    fn nested_containers_conform_recursively() {
        let hint = TypeHint::map(TypeHint::array(TypeHint::Float));
        let value = hint
            .conform(json!({"a": [1, 2.5], "b": []}), Conformance::Strict)
            .unwrap();
        assert_eq!(value, json!({"a": [1.0, 2.5], "b": []}));
    }

    #[test]
    fn embedded_hint_names() {
        assert_eq!(TypeHint::parse_embedded("Int"), Some(TypeHint::Int));
        assert_eq!(TypeHint::parse_embedded("boolean"), Some(TypeHint::Bool));
        assert_eq!(TypeHint::parse_embedded("widget"), None);
    }

    #[test]
    fn evaluable_hints_for_containers() {
        assert_eq!(
            <Vec<Option<i64>>>::type_hint(),
            TypeHint::array(TypeHint::Int)
        );
        assert_eq!(
            <HashMap<String, String>>::type_hint(),
            TypeHint::map(TypeHint::String)
        );
    }
}
