//! Action implementations and their registry.
//!
//! An action is the unit of business work a node declares. Implementations
//! declare their registered name and input type on the type itself; the
//! registry maps names to type-erased implementations for the walker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arbor_types::error::StateError;
use arbor_types::session::ActionResponse;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::hint::{Evaluable, TypeHint};
use crate::walker::session::SessionEnv;

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// Everything one attempt of an action can see.
pub struct ActionContext<I> {
    pub node_key: String,
    pub action_key: String,
    /// Input evaluated for this attempt.
    pub input: I,
    /// Evaluated free-form properties.
    pub properties: Value,
    /// Response from before the latest revisit of this node, if any.
    pub previous_response: Option<ActionResponse>,
    /// 1-based attempt number within the current run.
    pub attempt: u32,
    /// Signalled when the walk is cancelled or this action's deadline is absorbed.
    pub cancellation: CancellationToken,
    pub(crate) env: Arc<SessionEnv>,
}

impl<I> ActionContext<I> {
    pub fn session_id(&self) -> &str {
        &self.env.session_id
    }

    pub fn root_session_id(&self) -> &str {
        &self.env.root_session_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.env.tree.name
    }

    pub fn user_context(&self) -> &Value {
        &self.env.user_context
    }

    /// Durable scratch state shared by every attempt of this action instance.
    pub async fn intermediates(&self) -> Result<Option<Value>, StateError> {
        self.env.store.intermediates(&self.action_key).await
    }

    pub async fn set_intermediates(&self, value: &Value) -> Result<(), StateError> {
        self.env
            .store
            .set_intermediates(&self.action_key, value)
            .await
    }

    fn with_input<J>(self, input: J) -> ActionContext<J> {
        ActionContext {
            node_key: self.node_key,
            action_key: self.action_key,
            input,
            properties: self.properties,
            previous_response: self.previous_response,
            attempt: self.attempt,
            cancellation: self.cancellation,
            env: self.env,
        }
    }
}

// ---------------------------------------------------------------------------
// Action trait
// ---------------------------------------------------------------------------

/// A registered unit of work.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition). Returning an
/// error makes the attempt eligible for retry under the action's policy.
pub trait Action: Send + Sync + 'static {
    /// Name workflow documents use in an action's `Type`.
    const NAME: &'static str;

    type Input: Evaluable;

    fn execute(
        &self,
        ctx: ActionContext<Self::Input>,
    ) -> impl Future<Output = anyhow::Result<ActionResponse>> + Send;
}

/// Why a type-erased action did not produce a response.
#[derive(Debug, thiserror::Error)]
pub enum ActionFailure {
    #[error("input does not fit the action's input type: {0}")]
    Input(#[source] serde_json::Error),

    #[error(transparent)]
    Failed(anyhow::Error),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`Action`] with boxed futures.
pub trait ActionDyn: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_hint(&self) -> TypeHint;

    fn execute_boxed(
        &self,
        ctx: ActionContext<Value>,
    ) -> BoxFuture<'_, Result<ActionResponse, ActionFailure>>;
}

impl<T: Action> ActionDyn for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn input_hint(&self) -> TypeHint {
        T::Input::type_hint()
    }

    fn execute_boxed(
        &self,
        ctx: ActionContext<Value>,
    ) -> BoxFuture<'_, Result<ActionResponse, ActionFailure>> {
        Box::pin(async move {
            let input: T::Input =
                serde_json::from_value(ctx.input.clone()).map_err(ActionFailure::Input)?;
            self.execute(ctx.with_input(input))
                .await
                .map_err(ActionFailure::Failed)
        })
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Name → implementation mapping consulted by the walker.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ActionDyn>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the builtin `Summary`, `Delay`, and
    /// `Subroutine` actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(crate::actions::SummaryAction)
            .register(crate::actions::DelayAction)
            .register(crate::actions::SubroutineAction);
        registry
    }

    /// Register an implementation under its declared name, replacing any
    /// previous registration of that name.
    pub fn register<A: Action>(&mut self, action: A) -> &mut Self {
        if self
            .actions
            .insert(A::NAME.to_string(), Arc::new(action))
            .is_some()
        {
            tracing::debug!(action = A::NAME, "replaced registered action");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionDyn>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::constants::{DELAY_ACTION_TYPE, SUBROUTINE_ACTION_TYPE, SUMMARY_ACTION_TYPE};

    struct Echo;

    impl Action for Echo {
        const NAME: &'static str = "Echo";
        type Input = String;

        async fn execute(&self, ctx: ActionContext<String>) -> anyhow::Result<ActionResponse> {
            Ok(ActionResponse::success(Value::String(ctx.input)))
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![DELAY_ACTION_TYPE, SUBROUTINE_ACTION_TYPE, SUMMARY_ACTION_TYPE]
        );
    }

    #[test]
    fn test_register_exposes_input_hint() {
        let mut registry = ActionRegistry::new();
        registry.register(Echo);
        let echo = registry.get("Echo").unwrap();
        assert_eq!(echo.name(), "Echo");
        assert_eq!(echo.input_hint(), TypeHint::String);
        assert!(!registry.contains("Missing"));
    }
}
