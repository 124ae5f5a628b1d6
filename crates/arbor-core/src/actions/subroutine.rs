use arbor_types::constants::SUBROUTINE_ACTION_TYPE;
use arbor_types::session::{ActionResponse, WalkStatus};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::action::{Action, ActionContext};
use crate::error::EngineError;
use crate::hint::{Evaluable, TypeHint};
use crate::subroutine::SubroutineRequest;

const NESTED_SESSION_ID: &str = "NestedSessionId";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubroutineInput {
    /// Catalog name of the nested workflow.
    pub workflow: String,
    /// Input handed to the nested session on first open.
    #[serde(default)]
    pub input: Value,
}

impl Evaluable for SubroutineInput {
    fn type_hint() -> TypeHint {
        TypeHint::Object {
            name: "SubroutineInput",
            fields: vec![("Workflow", TypeHint::String), ("Input", TypeHint::Any)],
        }
    }
}

/// Runs a nested workflow session as if it were a single action.
///
/// The nested session id is persisted in this action's intermediates, so a
/// retry or a restarted process resumes the same nested session; a revisit of
/// the node clears it and starts a fresh one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubroutineAction;

impl Action for SubroutineAction {
    const NAME: &'static str = SUBROUTINE_ACTION_TYPE;
    type Input = SubroutineInput;

    async fn execute(&self, ctx: ActionContext<SubroutineInput>) -> anyhow::Result<ActionResponse> {
        let env = &ctx.env;
        let provider = env
            .services
            .subroutines
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no subroutine provider is configured"))?;

        let depth = env.depth + 1;
        let max_depth = env.services.config.max_subroutine_depth;
        if depth > max_depth {
            anyhow::bail!(
                "subroutine '{}' would exceed the maximum nesting depth of {max_depth}",
                ctx.input.workflow
            );
        }

        let nested_session_id = match ctx
            .intermediates()
            .await?
            .as_ref()
            .and_then(|v| v.get(NESTED_SESSION_ID))
            .and_then(Value::as_str)
        {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::now_v7().to_string();
                ctx.set_intermediates(&json!({ NESTED_SESSION_ID: id })).await?;
                id
            }
        };

        tracing::debug!(
            action_key = %ctx.action_key,
            workflow = %ctx.input.workflow,
            nested_session_id = %nested_session_id,
            depth,
            "opening nested session"
        );

        let walker = provider
            .open(SubroutineRequest {
                workflow: ctx.input.workflow.clone(),
                nested_session_id: nested_session_id.clone(),
                root_session_id: env.root_session_id.clone(),
                store: env.store.nested(&nested_session_id),
                services: env.services.clone(),
                user_context: env.user_context.clone(),
                input: ctx.input.input.clone(),
                depth,
                cancellation: ctx.cancellation.child_token(),
            })
            .await?;

        let outcome = walker.resume().await;
        match outcome.status {
            WalkStatus::RanToCompletion | WalkStatus::RanToCompletionNoChildMatched => Ok(outcome
                .last_response
                .unwrap_or_else(|| ActionResponse::synthetic(outcome.status.as_str(), Value::Null))),
            WalkStatus::Cancelled | WalkStatus::CancelledBeforeExecution => {
                Err(EngineError::Cancelled.into())
            }
            status => Err(match outcome.error {
                Some(e) => anyhow::Error::new(e)
                    .context(format!("nested workflow '{}' ended with {status}", ctx.input.workflow)),
                None => anyhow::anyhow!(
                    "nested workflow '{}' ended with {status}",
                    ctx.input.workflow
                ),
            }),
        }
    }
}
