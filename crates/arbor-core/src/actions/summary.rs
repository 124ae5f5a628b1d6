use arbor_types::constants::SUMMARY_ACTION_TYPE;
use arbor_types::session::ActionResponse;

use crate::action::{Action, ActionContext};
use crate::hint::{Evaluable, TypeHint};

impl Evaluable for ActionResponse {
    fn type_hint() -> TypeHint {
        TypeHint::Object {
            name: "ActionResponse",
            fields: vec![
                ("StatusCode", TypeHint::Int),
                ("Status", TypeHint::String),
                ("Output", TypeHint::Any),
            ],
        }
    }
}

/// Returns its evaluated input as the action response.
///
/// Typically the single action of a Leaf node, summarizing the walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryAction;

impl Action for SummaryAction {
    const NAME: &'static str = SUMMARY_ACTION_TYPE;
    type Input = ActionResponse;

    async fn execute(&self, ctx: ActionContext<ActionResponse>) -> anyhow::Result<ActionResponse> {
        Ok(ctx.input)
    }
}
