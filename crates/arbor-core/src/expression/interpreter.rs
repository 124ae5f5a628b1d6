//! Evaluation of parsed JEXL syntax trees.
//!
//! Operator semantics follow `jexl_eval`: numbers are `f64`, numeric equality
//! uses an epsilon, `&&`/`||` short-circuit and return an operand, dot access
//! on a missing member yields `null`, and `array[.field op value]` filters.
//! Evaluating a stored tree never touches the parser.

use std::collections::HashMap;

use jexl_eval::TransformFn;
use jexl_parser::ast::{Expression, OpCode};
use serde_json::{Map, Value};

use super::ExpressionError;

const EPSILON: f64 = 0.000_001;

/// Transform table keyed by the name used after `|`.
pub(super) type Transforms = HashMap<String, TransformFn<'static>>;

pub(super) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluate `expr` against `context`.
pub(super) fn evaluate(
    expr: &Expression,
    context: &Value,
    transforms: &Transforms,
) -> Result<Value, ExpressionError> {
    if let Some(resolved) = resolve(expr, context) {
        return resolved.map(|found| found.cloned().unwrap_or(Value::Null));
    }

    match expr {
        Expression::Number(n) => Ok(Value::from(*n)),
        Expression::Boolean(b) => Ok(Value::Bool(*b)),
        Expression::String(s) => Ok(Value::String(s.clone())),
        Expression::Null => Ok(Value::Null),

        Expression::Array(items) => items
            .iter()
            .map(|item| evaluate(item, context, transforms))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),

        Expression::Object(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, item) in entries {
                if map.contains_key(key) {
                    return Err(ExpressionError::DuplicateObjectKey(key.clone()));
                }
                map.insert(key.clone(), evaluate(item, context, transforms)?);
            }
            Ok(Value::Object(map))
        }

        Expression::Identifier(name) => Err(ExpressionError::UndefinedIdentifier(name.clone())),

        Expression::DotOperation { subject, ident } => {
            let subject = evaluate(subject, context, transforms)?;
            Ok(member(subject, ident))
        }

        Expression::IndexOperation { subject, index } => {
            let subject = evaluate(subject, context, transforms)?;
            index_into(subject, index, context, transforms)
        }

        Expression::BinaryOperation {
            operation,
            left,
            right,
        } => binary(*operation, left, right, context, transforms),

        Expression::Transform {
            name,
            subject,
            args,
        } => {
            let transform = transforms
                .get(name)
                .ok_or_else(|| ExpressionError::UnknownTransform(name.clone()))?;
            let mut values = Vec::with_capacity(1 + args.as_ref().map_or(0, Vec::len));
            values.push(evaluate(subject, context, transforms)?);
            for arg in args.iter().flatten() {
                values.push(evaluate(arg, context, transforms)?);
            }
            transform(&values).map_err(|source| ExpressionError::Transform {
                name: name.clone(),
                source,
            })
        }

        Expression::Conditional {
            left,
            truthy: when_true,
            falsy: when_false,
        } => {
            let holds = evaluate(left, context, transforms).is_ok_and(|v| truthy(&v));
            let branch = if holds { when_true } else { when_false };
            evaluate(branch, context, transforms)
        }

        // Only meaningful inside an index operation.
        Expression::Filter { .. } => Err(ExpressionError::InvalidFilter),
    }
}

/// Resolve identifier and dot chains by reference, so reading
/// `session.Lookup.Output` does not copy the whole `session` binding.
///
/// `None` when `expr` is not such a chain. `Ok(None)` is a missing member.
fn resolve<'c>(
    expr: &Expression,
    context: &'c Value,
) -> Option<Result<Option<&'c Value>, ExpressionError>> {
    match expr {
        Expression::Identifier(name) => Some(
            context
                .get(name.as_str())
                .map(Some)
                .ok_or_else(|| ExpressionError::UndefinedIdentifier(name.clone())),
        ),
        Expression::DotOperation { subject, ident } => Some(
            resolve(subject, context)?.map(|parent| parent.and_then(|p| p.get(ident.as_str()))),
        ),
        _ => None,
    }
}

fn member(subject: Value, key: &str) -> Value {
    match subject {
        Value::Object(mut map) => map.remove(key).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index_into(
    subject: Value,
    index: &Expression,
    context: &Value,
    transforms: &Transforms,
) -> Result<Value, ExpressionError> {
    if let Expression::Filter { ident, op, right } = index {
        let Value::Array(items) = subject else {
            return Err(ExpressionError::InvalidFilter);
        };
        let right = evaluate(right, context, transforms)?;
        let kept = items
            .into_iter()
            .filter(|item| {
                let left = item.get(ident.as_str()).cloned().unwrap_or(Value::Null);
                apply(*op, left, right.clone()).is_ok_and(|v| truthy(&v))
            })
            .collect();
        return Ok(Value::Array(kept));
    }

    match evaluate(index, context, transforms)? {
        Value::String(key) => Ok(member(subject, &key)),
        Value::Number(n) => {
            let position = n.as_f64().unwrap_or(0.0).floor() as usize;
            Ok(match subject {
                Value::Array(mut items) if position < items.len() => items.swap_remove(position),
                _ => Value::Null,
            })
        }
        other => Err(ExpressionError::InvalidIndex(other)),
    }
}

fn binary(
    operation: OpCode,
    left: &Expression,
    right: &Expression,
    context: &Value,
    transforms: &Transforms,
) -> Result<Value, ExpressionError> {
    let left = evaluate(left, context, transforms);
    match operation {
        OpCode::Or => match left {
            Ok(value) if truthy(&value) => Ok(value),
            _ => evaluate(right, context, transforms),
        },
        OpCode::And => match left {
            Ok(value) if truthy(&value) => evaluate(right, context, transforms),
            other => other,
        },
        _ => apply(operation, left?, evaluate(right, context, transforms)?),
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < EPSILON,
            _ => false,
        },
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        _ => false,
    }
}

fn invalid(operation: OpCode, left: Value, right: Value) -> ExpressionError {
    ExpressionError::InvalidOperation {
        operation,
        left,
        right,
    }
}

fn apply(operation: OpCode, left: Value, right: Value) -> Result<Value, ExpressionError> {
    match (operation, left, right) {
        (OpCode::Equal, a, b) => Ok(Value::Bool(equal(&a, &b))),
        (OpCode::NotEqual, a, b) => Ok(Value::Bool(!equal(&a, &b))),
        (OpCode::And, a, b) => Ok(if truthy(&a) { b } else { a }),
        (OpCode::Or, a, b) => Ok(if truthy(&a) { a } else { b }),

        (op, Value::Number(a), Value::Number(b)) => {
            let (l, r) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            Ok(match op {
                OpCode::Add => Value::from(l + r),
                OpCode::Subtract => Value::from(l - r),
                OpCode::Multiply => Value::from(l * r),
                OpCode::Divide => Value::from(l / r),
                OpCode::FloorDivide => Value::from((l / r).floor()),
                OpCode::Modulus => Value::from(l % r),
                OpCode::Exponent => Value::from(l.powf(r)),
                OpCode::Less => Value::Bool(l < r),
                OpCode::Greater => Value::Bool(l > r),
                OpCode::LessEqual => Value::Bool(l <= r),
                OpCode::GreaterEqual => Value::Bool(l >= r),
                OpCode::In => Value::Bool(false),
                _ => return Err(invalid(op, Value::Number(a), Value::Number(b))),
            })
        }

        (op, Value::String(a), Value::String(b)) => match op {
            OpCode::Add => Ok(Value::String(a + &b)),
            OpCode::In => Ok(Value::Bool(b.contains(a.as_str()))),
            OpCode::Less => Ok(Value::Bool(a < b)),
            OpCode::Greater => Ok(Value::Bool(a > b)),
            OpCode::LessEqual => Ok(Value::Bool(a <= b)),
            OpCode::GreaterEqual => Ok(Value::Bool(a >= b)),
            _ => Err(invalid(op, Value::String(a), Value::String(b))),
        },

        (OpCode::In, needle, Value::Array(items)) => Ok(Value::Bool(items.contains(&needle))),
        (OpCode::In, Value::String(key), Value::Object(map)) => {
            Ok(Value::Bool(map.contains_key(&key)))
        }

        (op, left, right) => Err(invalid(op, left, right)),
    }
}
