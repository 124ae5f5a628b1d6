//! Expression execution cache.
//!
//! Embedded expressions are JEXL snippets prefixed with `=>`, optionally
//! carrying a result-type hint: `=><int> session.Lookup.Output.Count + 1`.
//!
//! Two tiers amortize the cost of preparing expressions:
//! 1. A base context (the transform table every expression can use, standard
//!    transforms plus caller-supplied dependencies) is built once, warmed on a
//!    background task when the cache is constructed inside a Tokio runtime.
//! 2. Each distinct expression text is parsed once into a syntax tree and
//!    memoized by its literal text. Executions evaluate the stored tree, so a
//!    repeated expression (even across sessions sharing the cache) costs a
//!    lookup plus evaluation.
//!
//! **Security note:** session data is always passed as the evaluation context,
//! NEVER interpolated into expression strings.

mod interpreter;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor_types::constants::EXPRESSION_PREFIX;
use dashmap::DashMap;
use jexl_parser::ast::{Expression, OpCode};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::hint::{Conformance, HintMismatch, TypeHint};
use interpreter::{Transforms, truthy};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while compiling or executing an expression.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("'{0}' is not an expression (missing '=>' marker)")]
    NotAnExpression(String),

    #[error("unknown result type hint '<{0}>'")]
    UnknownTypeHint(String),

    #[error("expression failed to compile: {0}")]
    Compile(String),

    #[error("identifier '{0}' is not defined")]
    UndefinedIdentifier(String),

    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    #[error("transform '{name}' failed: {source}")]
    Transform {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot apply {operation} to {left} and {right}")]
    InvalidOperation {
        operation: OpCode,
        left: Value,
        right: Value,
    },

    #[error("cannot index with {0}")]
    InvalidIndex(Value),

    #[error("filters apply only to arrays")]
    InvalidFilter,

    #[error("duplicate object key '{0}'")]
    DuplicateObjectKey(String),

    #[error("expression result has the wrong type: {0}")]
    TypeMismatch(#[from] HintMismatch),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

type SharedTransform = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A named transform supplied to the cache at construction time, callable as
/// `value|name(args...)`.
#[derive(Clone)]
pub struct ExpressionDependency {
    name: String,
    transform: SharedTransform,
}

impl ExpressionDependency {
    pub fn new<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ExpressionDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionDependency")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn str_arg(args: &[Value], index: usize, default: &str) -> String {
    args.get(index)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// Transforms every expression can use without declaring a dependency.
fn standard_transforms() -> Vec<ExpressionDependency> {
    vec![
        ExpressionDependency::new("lower", |args| {
            Ok(json!(str_arg(args, 0, "").to_lowercase()))
        }),
        ExpressionDependency::new("upper", |args| {
            Ok(json!(str_arg(args, 0, "").to_uppercase()))
        }),
        ExpressionDependency::new("trim", |args| Ok(json!(str_arg(args, 0, "").trim()))),
        ExpressionDependency::new("split", |args| {
            let subject = str_arg(args, 0, "");
            let delimiter = str_arg(args, 1, ",");
            let parts: Vec<&str> = subject.split(delimiter.as_str()).collect();
            Ok(json!(parts))
        }),
        ExpressionDependency::new("not", |args| {
            Ok(json!(!truthy(args.first().unwrap_or(&Value::Null))))
        }),
        ExpressionDependency::new("contains", |args| match args.first() {
            Some(Value::Array(items)) => {
                let needle = args.get(1).cloned().unwrap_or(Value::Null);
                Ok(json!(items.contains(&needle)))
            }
            _ => Ok(json!(str_arg(args, 0, "").contains(&str_arg(args, 1, "")))),
        }),
        ExpressionDependency::new("startsWith", |args| {
            Ok(json!(str_arg(args, 0, "").starts_with(&str_arg(args, 1, ""))))
        }),
        ExpressionDependency::new("endsWith", |args| {
            Ok(json!(str_arg(args, 0, "").ends_with(&str_arg(args, 1, ""))))
        }),
        ExpressionDependency::new("length", |args| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        }),
        ExpressionDependency::new("keys", |args| match args.first() {
            Some(Value::Object(o)) => Ok(json!(o.keys().collect::<Vec<_>>())),
            _ => Ok(json!([])),
        }),
    ]
}

// ---------------------------------------------------------------------------
// Base context (tier 1)
// ---------------------------------------------------------------------------

/// The shared, immutable transform table every execution evaluates with.
struct BaseContext {
    transforms: Transforms,
}

impl BaseContext {
    fn build(supplied: &[ExpressionDependency]) -> Self {
        let mut transforms = Transforms::new();
        for dependency in standard_transforms().iter().chain(supplied) {
            if transforms.contains_key(&dependency.name) {
                tracing::debug!(
                    transform = %dependency.name,
                    "skipping supplied expression dependency that is always available"
                );
                continue;
            }
            let transform = Arc::clone(&dependency.transform);
            transforms.insert(
                dependency.name.clone(),
                Box::new(move |args: &[Value]| transform(args)),
            );
        }
        Self { transforms }
    }
}

// ---------------------------------------------------------------------------
// Compiled expressions (tier 2)
// ---------------------------------------------------------------------------

/// A parsed expression, keyed in the cache by its literal text.
#[derive(Debug, PartialEq)]
pub struct CompiledExpression {
    /// Expression body without the marker and hint.
    pub body: String,
    /// Result type declared inline with `<Type>`, if any.
    pub declared: Option<TypeHint>,
    ast: Expression,
}

impl CompiledExpression {
    /// Strip the marker, read an optional `<Type>` hint, and parse the body.
    pub fn compile(text: &str) -> Result<Self, ExpressionError> {
        let rest = text
            .trim_start()
            .strip_prefix(EXPRESSION_PREFIX)
            .ok_or_else(|| ExpressionError::NotAnExpression(text.to_string()))?;

        let (declared, body) = match rest.strip_prefix('<') {
            Some(hinted) => {
                let end = hinted
                    .find('>')
                    .ok_or_else(|| ExpressionError::Compile("unterminated type hint".into()))?;
                let name = &hinted[..end];
                let hint = TypeHint::parse_embedded(name)
                    .ok_or_else(|| ExpressionError::UnknownTypeHint(name.to_string()))?;
                (Some(hint), &hinted[end + 1..])
            }
            None => (None, rest),
        };

        let body = body.trim();
        if body.is_empty() {
            return Err(ExpressionError::Compile("empty expression".into()));
        }
        let ast = jexl_parser::Parser::parse(body)
            .map_err(|e| ExpressionError::Compile(e.to_string()))?;

        Ok(Self {
            body: body.to_string(),
            declared,
            ast,
        })
    }

    fn evaluate(&self, base: &BaseContext, context: &Value) -> Result<Value, ExpressionError> {
        interpreter::evaluate(&self.ast, context, &base.transforms)
    }
}

/// Whether a string schema value is an embedded expression.
pub fn is_expression(text: &str) -> bool {
    text.trim_start().starts_with(EXPRESSION_PREFIX)
}

// ---------------------------------------------------------------------------
// ExpressionCache
// ---------------------------------------------------------------------------

/// Two-tier expression cache shared by every session of a process.
pub struct ExpressionCache {
    dependencies: Arc<Vec<ExpressionDependency>>,
    base: Arc<OnceCell<BaseContext>>,
    compiled: DashMap<String, Arc<CompiledExpression>>,
    /// Parser invocations, misses only.
    parses: AtomicUsize,
}

impl ExpressionCache {
    /// Create a cache with only the standard transforms.
    pub fn new() -> Self {
        Self::with_dependencies(Vec::new())
    }

    /// Create a cache whose expressions may also call the supplied transforms.
    ///
    /// When called inside a Tokio runtime the base context is warmed on a
    /// background task; otherwise it is built on first use.
    pub fn with_dependencies(dependencies: Vec<ExpressionDependency>) -> Self {
        let cache = Self {
            dependencies: Arc::new(dependencies),
            base: Arc::new(OnceCell::new()),
            compiled: DashMap::new(),
            parses: AtomicUsize::new(0),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let base = Arc::clone(&cache.base);
            let dependencies = Arc::clone(&cache.dependencies);
            handle.spawn(async move {
                let warmed = base
                    .get_or_init(|| async { BaseContext::build(&dependencies) })
                    .await;
                tracing::debug!(
                    transforms = warmed.transforms.len(),
                    "expression base context warmed"
                );
            });
        }

        cache
    }

    /// Whether the base context has been built.
    pub fn is_warm(&self) -> bool {
        self.base.initialized()
    }

    /// Number of memoized expressions.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// How many times an expression text has been handed to the parser.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    async fn base(&self) -> &BaseContext {
        self.base
            .get_or_init(|| async { BaseContext::build(&self.dependencies) })
            .await
    }

    /// Fetch the compiled form of `text`, compiling and memoizing on a miss.
    ///
    /// Failed compilations are not memoized.
    pub fn compile(&self, text: &str) -> Result<Arc<CompiledExpression>, ExpressionError> {
        if let Some(hit) = self.compiled.get(text) {
            tracing::trace!(expression = text, "expression cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        tracing::debug!(expression = text, "expression cache miss");
        self.parses.fetch_add(1, Ordering::Relaxed);
        let compiled = Arc::new(CompiledExpression::compile(text)?);
        let entry = self
            .compiled
            .entry(text.to_string())
            .or_insert_with(|| compiled);
        Ok(Arc::clone(entry.value()))
    }

    /// Execute an expression against `context`.
    ///
    /// The result is checked against `expected`, else the inline hint; a
    /// mismatch is an error rather than a silent coercion.
    pub async fn execute(
        &self,
        text: &str,
        expected: Option<&TypeHint>,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let compiled = self.compile(text)?;
        let base = self.base().await;
        let result = compiled.evaluate(base, context)?;

        match expected.or(compiled.declared.as_ref()) {
            Some(hint) => Ok(hint.conform(result, Conformance::Strict)?),
            None => Ok(result),
        }
    }
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("compiled", &self.compiled.len())
            .field("warm", &self.is_warm())
            .field("parses", &self.parse_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Value {
        json!({
            "context": { "Region": "eu-west" },
            "session": {
                "Lookup": { "StatusCode": 200, "Status": "Success", "Output": { "Count": 2, "Name": "HELLO" } }
            },
            "input": { "Host": "db-1" }
        })
    }

    #[tokio::test]
    async fn test_reads_session_facade() {
        let cache = ExpressionCache::new();
        let result = cache
            .execute("=> session.Lookup.Output", None, &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({ "Count": 2, "Name": "HELLO" }));
    }

    #[tokio::test]
    async fn test_inline_hint_converts_whole_numbers() {
        let cache = ExpressionCache::new();
        let result = cache
            .execute("=><int> session.Lookup.Output.Count + 1", None, &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!(3));
    }

    #[tokio::test]
    async fn test_expected_type_mismatch_is_an_error() {
        let cache = ExpressionCache::new();
        let err = cache
            .execute("=> input.Host", Some(&TypeHint::Bool), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ExpressionError::TypeMismatch(_)));
    }

    #[tokio::test]
    async fn test_standard_transforms_available() {
        let cache = ExpressionCache::new();
        let result = cache
            .execute("=> session.Lookup.Output.Name|lower", None, &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!("hello"));

        let result = cache
            .execute("=> context.Region|startsWith('eu')", Some(&TypeHint::Bool), &ctx())
            .await
            .unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn test_supplied_dependency_and_builtin_clash() {
        let cache = ExpressionCache::with_dependencies(vec![
            ExpressionDependency::new("double", |args| {
                Ok(json!(args.first().and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0))
            }),
            // Clashes with the standard transform and is skipped.
            ExpressionDependency::new("upper", |_| Ok(json!("shadowed"))),
        ]);

        let doubled = cache
            .execute("=><int> session.Lookup.Output.Count|double", None, &ctx())
            .await
            .unwrap();
        assert_eq!(doubled, json!(4));

        let upper = cache
            .execute("=> input.Host|upper", None, &ctx())
            .await
            .unwrap();
        assert_eq!(upper, json!("DB-1"));
    }

    #[tokio::test]
    async fn test_memoized_by_literal_text() {
        let cache = ExpressionCache::new();
        for _ in 0..3 {
            cache
                .execute("=> input.Host == 'db-1'", None, &ctx())
                .await
                .unwrap();
        }
        cache
            .execute("=>  input.Host == 'db-1'", None, &ctx())
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.is_warm());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_parser() {
        let cache = ExpressionCache::new();
        let text = "=> session.Lookup.Output.Count * 10";
        for count in [1, 2, 3] {
            let ctx = json!({ "session": { "Lookup": { "Output": { "Count": count } } } });
            let result = cache.execute(text, None, &ctx).await.unwrap();
            assert_eq!(result, json!(count as f64 * 10.0));
        }
        assert_eq!(cache.parse_count(), 1);

        let first = cache.compile(text).unwrap();
        let again = cache.compile(text).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(matches!(first.ast, Expression::BinaryOperation { .. }));
        assert_eq!(cache.parse_count(), 1);

        cache.execute("=> input.Host", None, &ctx()).await.unwrap();
        assert_eq!(cache.parse_count(), 2);
    }

    #[tokio::test]
    async fn test_base_context_built_once() {
        let cache = ExpressionCache::new();
        let first: *const BaseContext = cache.base().await;
        let second: *const BaseContext = cache.base().await;
        assert!(std::ptr::eq(first, second));
        assert!(cache.base().await.transforms.contains_key("lower"));
    }

    #[tokio::test]
    async fn test_evaluation_errors_are_typed() {
        let cache = ExpressionCache::new();
        let err = cache.execute("=> nowhere.Field", None, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExpressionError::UndefinedIdentifier(ref name) if name == "nowhere"));

        let err = cache.execute("=> input.Host|shout", None, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownTransform(_)));
    }

    #[tokio::test]
    async fn test_compile_failures_are_not_cached() {
        let cache = ExpressionCache::new();
        assert!(cache.execute("=> (1 +", None, &ctx()).await.is_err());
        assert!(matches!(
            cache.compile("=><widget> 1"),
            Err(ExpressionError::UnknownTypeHint(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_compile_splits_hint_and_body() {
        let compiled = CompiledExpression::compile("  =><bool>  input.Ok ").unwrap();
        assert_eq!(compiled.body, "input.Ok");
        assert_eq!(compiled.declared, Some(TypeHint::Bool));
        assert!(CompiledExpression::compile("input.Ok").is_err());
        assert!(is_expression("=> 1"));
        assert!(!is_expression("plain"));
    }
}
