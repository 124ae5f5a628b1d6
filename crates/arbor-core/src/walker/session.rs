//! Per-session environment shared by the walker and its action tasks.

use std::sync::Arc;

use arbor_types::workflow::WorkflowTree;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::evaluator::EvaluationScope;
use crate::services::EngineServices;
use crate::state::SessionStore;

/// Immutable facts about one session plus handles to its collaborators.
///
/// Shared by `Arc` with every spawned action task of the session.
pub(crate) struct SessionEnv {
    pub tree: Arc<WorkflowTree>,
    pub services: EngineServices,
    pub store: SessionStore,
    pub session_id: String,
    pub root_session_id: String,
    pub user_context: Value,
    pub input: Value,
    /// Subroutine nesting depth (root is 0).
    pub depth: u32,
}

impl SessionEnv {
    /// Snapshot the session facade: every persisted action response by key.
    pub async fn scope(&self, cancellation: &CancellationToken) -> Result<EvaluationScope, EngineError> {
        let session = self.store.responses().await?;
        Ok(EvaluationScope::new(
            &self.user_context,
            session,
            &self.input,
            cancellation.clone(),
        ))
    }
}
