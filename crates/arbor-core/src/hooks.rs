//! Lifecycle hooks invoked around every node visit.
//!
//! `before_visit` may ask the walker to skip the node's actions while still
//! running its child selection. `after_visit` always runs, including when the
//! visit failed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Everything a hook learns about the node being visited.
#[derive(Debug, Clone)]
pub struct VisitContext {
    pub session_id: String,
    pub root_session_id: String,
    pub workflow_name: String,
    pub node_key: String,
    /// The node's evaluated dynamic properties (null when none are declared).
    pub properties: Value,
    pub user_context: Value,
    pub cancellation: CancellationToken,
}

/// What the walker should do with the upcoming visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitDirective {
    pub skip_actions: bool,
}

/// Caller-supplied visit hooks.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait VisitHooks: Send + Sync {
    fn before_visit(
        &self,
        ctx: &VisitContext,
    ) -> impl Future<Output = anyhow::Result<VisitDirective>> + Send;

    /// `error` is the failure of the visit, if it failed.
    fn after_visit(
        &self,
        ctx: &VisitContext,
        error: Option<&EngineError>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`VisitHooks`] with boxed futures.
pub trait VisitHooksDyn: Send + Sync {
    fn before_visit_boxed<'a>(
        &'a self,
        ctx: &'a VisitContext,
    ) -> BoxFuture<'a, anyhow::Result<VisitDirective>>;

    fn after_visit_boxed<'a>(
        &'a self,
        ctx: &'a VisitContext,
        error: Option<&'a EngineError>,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

impl<T: VisitHooks> VisitHooksDyn for T {
    fn before_visit_boxed<'a>(
        &'a self,
        ctx: &'a VisitContext,
    ) -> BoxFuture<'a, anyhow::Result<VisitDirective>> {
        Box::pin(self.before_visit(ctx))
    }

    fn after_visit_boxed<'a>(
        &'a self,
        ctx: &'a VisitContext,
        error: Option<&'a EngineError>,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.after_visit(ctx, error))
    }
}

/// Type-erased, cloneable hooks handle shared by a walker and its subroutines.
#[derive(Clone)]
pub struct BoxVisitHooks {
    inner: Arc<dyn VisitHooksDyn>,
}

impl BoxVisitHooks {
    pub fn new<T: VisitHooks + 'static>(hooks: T) -> Self {
        Self {
            inner: Arc::new(hooks),
        }
    }

    pub async fn before_visit(&self, ctx: &VisitContext) -> anyhow::Result<VisitDirective> {
        self.inner.before_visit_boxed(ctx).await
    }

    pub async fn after_visit(
        &self,
        ctx: &VisitContext,
        error: Option<&EngineError>,
    ) -> anyhow::Result<()> {
        self.inner.after_visit_boxed(ctx, error).await
    }
}

impl Default for BoxVisitHooks {
    fn default() -> Self {
        Self::new(NoopHooks)
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl VisitHooks for NoopHooks {
    async fn before_visit(&self, _ctx: &VisitContext) -> anyhow::Result<VisitDirective> {
        Ok(VisitDirective::default())
    }

    async fn after_visit(
        &self,
        _ctx: &VisitContext,
        _error: Option<&EngineError>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that report every visit through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl VisitHooks for TracingHooks {
    async fn before_visit(&self, ctx: &VisitContext) -> anyhow::Result<VisitDirective> {
        tracing::info!(
            session_id = %ctx.session_id,
            workflow = %ctx.workflow_name,
            node_key = %ctx.node_key,
            "visiting node"
        );
        Ok(VisitDirective::default())
    }

    async fn after_visit(
        &self,
        ctx: &VisitContext,
        error: Option<&EngineError>,
    ) -> anyhow::Result<()> {
        match error {
            Some(e) => tracing::info!(
                session_id = %ctx.session_id,
                node_key = %ctx.node_key,
                error = %e,
                "node visit ended with error"
            ),
            None => tracing::info!(
                session_id = %ctx.session_id,
                node_key = %ctx.node_key,
                "node visit completed"
            ),
        }
        Ok(())
    }
}
