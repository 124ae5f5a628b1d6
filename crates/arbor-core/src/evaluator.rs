//! Dynamic property evaluator.
//!
//! Turns schema values (literals, `=>` expressions, external-executor tags,
//! and containers of those) into runtime values shaped by a [`TypeHint`].
//! Every failure is reported as an [`EvaluationError`] wrapping its cause.

use std::future::Future;
use std::sync::Arc;

use arbor_types::constants::EXPRESSION_PREFIX;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::expression::{ExpressionCache, ExpressionError, is_expression};
use crate::hint::{Conformance, Evaluable, HintMismatch, TypeHint};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("expression at '{path}' failed: {source}")]
    Expression {
        path: String,
        #[source]
        source: ExpressionError,
    },

    #[error("external executor '{prefix}' failed at '{path}': {source}")]
    External {
        prefix: String,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("value at '{path}' does not fit: {source}")]
    Mismatch {
        path: String,
        #[source]
        source: HintMismatch,
    },

    #[error("unknown property '{property}' for {target} at '{path}'")]
    UnknownProperty {
        path: String,
        target: String,
        property: String,
    },

    #[error("failed to build {target}: {message}")]
    Build { target: String, message: String },

    #[error("evaluation cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// External executors
// ---------------------------------------------------------------------------

/// A collaborator that evaluates prefixed strings outside the expression engine.
pub trait ExternalExecutor: Send + Sync {
    /// Evaluate `expression` (the text after the registered prefix).
    fn execute(
        &self,
        expression: String,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<Value>>;
}

impl<F, Fut> ExternalExecutor for F
where
    F: Fn(String, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn execute(
        &self,
        expression: String,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin(self(expression, cancellation))
    }
}

/// Prefix-keyed registry of external executors, checked in registration order.
#[derive(Clone, Default)]
pub struct ExternalExecutors {
    entries: Vec<(String, Arc<dyn ExternalExecutor>)>,
}

impl ExternalExecutors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: ExternalExecutor + 'static>(&mut self, prefix: impl Into<String>, executor: E) {
        self.entries.push((prefix.into(), Arc::new(executor)));
    }

    fn find<'a>(&self, text: &'a str) -> Option<(&str, &'a str, Arc<dyn ExternalExecutor>)> {
        self.entries.iter().find_map(|(prefix, executor)| {
            text.strip_prefix(prefix.as_str())
                .map(|rest| (prefix.as_str(), rest, Arc::clone(executor)))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// EvaluationScope
// ---------------------------------------------------------------------------

/// The fixed bindings expressions evaluate against during one evaluation pass.
///
/// Shape:
/// ```json
/// {
///   "context": <user context>,
///   "session": { "<actionKey>": { "StatusCode": .., "Status": .., "Output": .. }, ... },
///   "input":   <workflow input or null>
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EvaluationScope {
    bindings: Value,
    cancellation: CancellationToken,
}

impl EvaluationScope {
    pub fn new(
        user_context: &Value,
        session: Map<String, Value>,
        input: &Value,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            bindings: json!({
                "context": user_context,
                "session": session,
                "input": input,
            }),
            cancellation,
        }
    }

    pub fn bindings(&self) -> &Value {
        &self.bindings
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

// ---------------------------------------------------------------------------
// PropertyEvaluator
// ---------------------------------------------------------------------------

/// Evaluates schema values. Cheap to clone; clones share the expression cache.
#[derive(Clone)]
pub struct PropertyEvaluator {
    cache: Arc<ExpressionCache>,
    executors: Arc<ExternalExecutors>,
}

impl PropertyEvaluator {
    pub fn new(cache: Arc<ExpressionCache>, executors: ExternalExecutors) -> Self {
        Self {
            cache,
            executors: Arc::new(executors),
        }
    }

    pub fn cache(&self) -> &Arc<ExpressionCache> {
        &self.cache
    }

    /// Evaluate `value` into a JSON value shaped by `expected`.
    pub async fn evaluate(
        &self,
        value: &Value,
        expected: Option<&TypeHint>,
        scope: &EvaluationScope,
    ) -> Result<Value, EvaluationError> {
        self.evaluate_at("$".to_string(), value, expected, scope).await
    }

    /// Evaluate an optional schema value straight into a typed sink.
    pub async fn evaluate_as<T: Evaluable>(
        &self,
        value: Option<&Value>,
        scope: &EvaluationScope,
    ) -> Result<T, EvaluationError> {
        let hint = T::type_hint();
        let shaped = match value {
            Some(value) => self.evaluate(value, Some(&hint), scope).await?,
            None => Value::Null,
        };
        serde_json::from_value(shaped).map_err(|e| EvaluationError::Build {
            target: std::any::type_name::<T>().to_string(),
            message: e.to_string(),
        })
    }

    /// Evaluate a child-selector condition.
    ///
    /// Absent or blank conditions hold. A plain string that is neither an
    /// expression nor an external tag is still evaluated as an expression body.
    pub async fn evaluate_condition(
        &self,
        condition: Option<&Value>,
        scope: &EvaluationScope,
    ) -> Result<bool, EvaluationError> {
        let condition = match condition {
            None | Some(Value::Null) => return Ok(true),
            Some(Value::String(s)) if s.trim().is_empty() => return Ok(true),
            Some(Value::String(s)) if !is_expression(s) && self.executors.find(s).is_none() => {
                Value::String(format!("{EXPRESSION_PREFIX} {s}"))
            }
            Some(other) => other.clone(),
        };

        self.evaluate_as::<bool>(Some(&condition), scope).await
    }

    fn evaluate_at<'a>(
        &'a self,
        path: String,
        value: &'a Value,
        expected: Option<&'a TypeHint>,
        scope: &'a EvaluationScope,
    ) -> BoxFuture<'a, Result<Value, EvaluationError>> {
        Box::pin(async move {
            if scope.cancellation.is_cancelled() {
                return Err(EvaluationError::Cancelled);
            }

            match value {
                Value::Null => Ok(Value::Null),

                Value::String(text) => {
                    if let Some((prefix, rest, executor)) = self.executors.find(text) {
                        let prefix = prefix.to_string();
                        let result = tokio::select! {
                            result = executor.execute(rest.to_string(), scope.cancellation.child_token()) => result,
                            _ = scope.cancellation.cancelled() => return Err(EvaluationError::Cancelled),
                        };
                        let result = result.map_err(|source| EvaluationError::External {
                            prefix,
                            path: path.clone(),
                            source,
                        })?;
                        return conform(&path, result, expected, Conformance::Lenient);
                    }

                    if is_expression(text) {
                        return self
                            .cache
                            .execute(text, expected, &scope.bindings)
                            .await
                            .map_err(|source| EvaluationError::Expression { path, source });
                    }

                    conform(&path, value.clone(), expected, Conformance::Lenient)
                }

                Value::Object(map) => match expected {
                    Some(hint @ TypeHint::Object { .. }) => {
                        let mut shaped = Map::with_capacity(map.len());
                        for (key, item) in map {
                            let field = hint.field(key).ok_or_else(|| {
                                EvaluationError::UnknownProperty {
                                    path: path.clone(),
                                    target: hint.to_string(),
                                    property: key.clone(),
                                }
                            })?;
                            let evaluated = self
                                .evaluate_at(format!("{path}.{key}"), item, Some(field), scope)
                                .await?;
                            shaped.insert(key.clone(), evaluated);
                        }
                        Ok(Value::Object(shaped))
                    }
                    Some(TypeHint::Map(inner)) => {
                        self.evaluate_entries(&path, map, Some(inner.as_ref()), scope).await
                    }
                    None | Some(TypeHint::Any) => {
                        self.evaluate_entries(&path, map, None, scope).await
                    }
                    Some(other) => Err(EvaluationError::Mismatch {
                        path,
                        source: HintMismatch {
                            expected: other.to_string(),
                            found: "object".to_string(),
                        },
                    }),
                },

                Value::Array(items) => {
                    let inner = match expected {
                        Some(TypeHint::Array(inner)) => Some(inner.as_ref()),
                        None | Some(TypeHint::Any) => None,
                        Some(other) => {
                            return Err(EvaluationError::Mismatch {
                                path,
                                source: HintMismatch {
                                    expected: other.to_string(),
                                    found: format!("array of {}", items.len()),
                                },
                            });
                        }
                    };
                    let mut shaped = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        shaped.push(
                            self.evaluate_at(format!("{path}[{index}]"), item, inner, scope)
                                .await?,
                        );
                    }
                    Ok(Value::Array(shaped))
                }

                Value::Bool(_) | Value::Number(_) => {
                    conform(&path, value.clone(), expected, Conformance::Lenient)
                }
            }
        })
    }

    async fn evaluate_entries(
        &self,
        path: &str,
        map: &Map<String, Value>,
        inner: Option<&TypeHint>,
        scope: &EvaluationScope,
    ) -> Result<Value, EvaluationError> {
        let mut shaped = Map::with_capacity(map.len());
        for (key, item) in map {
            let evaluated = self
                .evaluate_at(format!("{path}.{key}"), item, inner, scope)
                .await?;
            shaped.insert(key.clone(), evaluated);
        }
        Ok(Value::Object(shaped))
    }
}

impl Default for PropertyEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(ExpressionCache::new()), ExternalExecutors::new())
    }
}

fn conform(
    path: &str,
    value: Value,
    expected: Option<&TypeHint>,
    mode: Conformance,
) -> Result<Value, EvaluationError> {
    match expected {
        Some(hint) => hint
            .conform(value, mode)
            .map_err(|source| EvaluationError::Mismatch {
                path: path.to_string(),
                source,
            }),
        None => Ok(value),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    enum Severity {
        Low,
        High,
    }

    impl Evaluable for Severity {
        fn type_hint() -> TypeHint {
            TypeHint::Enum {
                name: "Severity",
                variants: &["Low", "High"],
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Endpoint {
        url: String,
        retries: u32,
        #[serde(default)]
        severity: Option<Severity>,
        #[serde(default)]
        tags: Vec<String>,
    }

    impl Evaluable for Endpoint {
        fn type_hint() -> TypeHint {
            TypeHint::Object {
                name: "Endpoint",
                fields: vec![
                    ("Url", TypeHint::String),
                    ("Retries", TypeHint::Int),
                    ("Severity", Severity::type_hint()),
                    ("Tags", TypeHint::array(TypeHint::String)),
                ],
            }
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Rollout {
        primary: Endpoint,
        #[serde(default)]
        fallbacks: Vec<Endpoint>,
        #[serde(default)]
        weights: HashMap<String, f64>,
    }

    impl Evaluable for Rollout {
        fn type_hint() -> TypeHint {
            TypeHint::Object {
                name: "Rollout",
                fields: vec![
                    ("Primary", Endpoint::type_hint()),
                    ("Fallbacks", TypeHint::array(Endpoint::type_hint())),
                    ("Weights", TypeHint::map(TypeHint::Float)),
                ],
            }
        }
    }

    async fn round_trip<T>(value: &T) -> T
    where
        T: Evaluable + Serialize,
    {
        let raw = serde_json::to_value(value).unwrap();
        PropertyEvaluator::default()
            .evaluate_as::<T>(Some(&raw), &scope())
            .await
            .unwrap()
    }

    fn scope() -> EvaluationScope {
        let mut session = Map::new();
        session.insert(
            "Lookup".to_string(),
            json!({"StatusCode": 0, "Status": "Success", "Output": {"Host": "db-1", "Attempts": 2}}),
        );
        EvaluationScope::new(
            &json!({"Env": "prod"}),
            session,
            &json!({"Severity": "high"}),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_object_into_typed_sink() {
        let evaluator = PropertyEvaluator::default();
        let raw = json!({
            "Url": "=> 'http://' + session.Lookup.Output.Host",
            "Retries": "=> session.Lookup.Output.Attempts + 1",
            "Severity": "=> input.Severity",
            "Tags": ["=> context.Env", "static"]
        });
        let endpoint: Endpoint = evaluator.evaluate_as(Some(&raw), &scope()).await.unwrap();
        assert_eq!(
            endpoint,
            Endpoint {
                url: "http://db-1".to_string(),
                retries: 3,
                severity: Some(Severity::High),
                tags: vec!["prod".to_string(), "static".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_serialized_values_evaluate_back() {
        assert_eq!(round_trip(&42i64).await, 42);
        assert_eq!(round_trip(&-7i32).await, -7);
        assert_eq!(round_trip(&2.5f64).await, 2.5);
        assert!(round_trip(&true).await);
        assert_eq!(round_trip(&"plain text".to_string()).await, "plain text");
        assert_eq!(round_trip(&Severity::High).await, Severity::High);

        let ports = vec![80u32, 443, 8080];
        assert_eq!(round_trip(&ports).await, ports);

        let levels = HashMap::from([
            ("api".to_string(), Severity::Low),
            ("db".to_string(), Severity::High),
        ]);
        assert_eq!(round_trip(&levels).await, levels);

        let primary = Endpoint {
            url: "http://db-1".to_string(),
            retries: 3,
            severity: Some(Severity::High),
            tags: vec!["prod".to_string()],
        };
        let rollout = Rollout {
            primary: primary.clone(),
            fallbacks: vec![Endpoint {
                url: "http://db-2".to_string(),
                retries: 0,
                severity: None,
                tags: Vec::new(),
            }],
            weights: HashMap::from([("db-1".to_string(), 0.75), ("db-2".to_string(), 0.25)]),
        };
        assert_eq!(round_trip(&primary).await, primary);
        assert_eq!(round_trip(&rollout).await, rollout);
    }

    #[tokio::test]
    async fn test_unknown_property_is_rejected() {
        let evaluator = PropertyEvaluator::default();
        let raw = json!({"Url": "x", "Retries": 1, "Bogus": true});
        let err = evaluator
            .evaluate_as::<Endpoint>(Some(&raw), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnknownProperty { ref property, .. } if property == "Bogus"));
    }

    #[tokio::test]
    async fn test_plain_string_enum_member() {
        let evaluator = PropertyEvaluator::default();
        let low: Severity = evaluator
            .evaluate_as(Some(&json!("low")), &scope())
            .await
            .unwrap();
        assert_eq!(low, Severity::Low);

        let err = evaluator
            .evaluate_as::<Severity>(Some(&json!("Critical")), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Mismatch { .. }));
    }

    #[tokio::test]
    async fn test_literal_shapes_pass_through_untyped() {
        let evaluator = PropertyEvaluator::default();
        let raw = json!({"A": [1, true, null], "B": {"C": "=> context.Env"}});
        let value = evaluator.evaluate(&raw, None, &scope()).await.unwrap();
        assert_eq!(value, json!({"A": [1, true, null], "B": {"C": "prod"}}));
    }

    #[tokio::test]
    async fn test_dictionary_target() {
        let evaluator = PropertyEvaluator::default();
        let raw = json!({"a": "1", "b": 2});
        let map: HashMap<String, i64> = evaluator.evaluate_as(Some(&raw), &scope()).await.unwrap();
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("b"), Some(&2));
    }

    #[tokio::test]
    async fn test_expression_errors_are_wrapped() {
        let evaluator = PropertyEvaluator::default();
        let err = evaluator
            .evaluate(&json!("=> (("), None, &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Expression { .. }));
    }

    #[tokio::test]
    async fn test_external_executor_by_prefix() {
        let mut executors = ExternalExecutors::new();
        executors.register("kv:", |expression: String, _cancel: CancellationToken| async move {
            Ok::<_, anyhow::Error>(json!(format!("{expression}-resolved")))
        });
        executors.register("fail:", |_expression: String, _cancel: CancellationToken| async move {
            Err::<Value, _>(anyhow::anyhow!("backend down"))
        });
        let evaluator = PropertyEvaluator::new(Arc::new(ExpressionCache::new()), executors);

        let value = evaluator
            .evaluate(&json!("kv:limits"), Some(&TypeHint::String), &scope())
            .await
            .unwrap();
        assert_eq!(value, json!("limits-resolved"));

        let err = evaluator
            .evaluate(&json!("fail:x"), None, &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::External { ref prefix, .. } if prefix == "fail:"));
    }

    #[tokio::test]
    async fn test_conditions() {
        let evaluator = PropertyEvaluator::default();
        let scope = scope();
        assert!(evaluator.evaluate_condition(None, &scope).await.unwrap());
        assert!(evaluator.evaluate_condition(Some(&json!("")), &scope).await.unwrap());
        assert!(
            evaluator
                .evaluate_condition(Some(&json!("session.Lookup.Output.Attempts < 3")), &scope)
                .await
                .unwrap()
        );
        assert!(
            !evaluator
                .evaluate_condition(Some(&json!("=> context.Env == 'dev'")), &scope)
                .await
                .unwrap()
        );
        assert!(!evaluator.evaluate_condition(Some(&json!(false)), &scope).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_evaluation() {
        let evaluator = PropertyEvaluator::default();
        let scope = scope();
        scope.cancellation().cancel();
        let err = evaluator.evaluate(&json!(1), None, &scope).await.unwrap_err();
        assert!(matches!(err, EvaluationError::Cancelled));
    }
}
