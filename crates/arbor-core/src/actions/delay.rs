use std::time::Duration;

use arbor_types::constants::DELAY_ACTION_TYPE;
use arbor_types::session::ActionResponse;
use serde::Deserialize;
use serde_json::json;

use crate::action::{Action, ActionContext};
use crate::hint::{Evaluable, TypeHint};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DelayInput {
    pub delay_ms: u64,
}

impl Evaluable for DelayInput {
    fn type_hint() -> TypeHint {
        TypeHint::Object {
            name: "DelayInput",
            fields: vec![("DelayMs", TypeHint::Int)],
        }
    }
}

/// Sleeps for `DelayMs`, returning early with an error when cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayAction;

impl Action for DelayAction {
    const NAME: &'static str = DELAY_ACTION_TYPE;
    type Input = DelayInput;

    async fn execute(&self, ctx: ActionContext<DelayInput>) -> anyhow::Result<ActionResponse> {
        let delay = Duration::from_millis(ctx.input.delay_ms);
        tokio::select! {
            _ = ctx.cancellation.cancelled() => anyhow::bail!("delay cancelled"),
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(ActionResponse::success(json!({ "DelayedMs": ctx.input.delay_ms })))
    }
}
