//! Engine error taxonomy and its mapping onto terminal walk statuses.

use arbor_types::error::StateError;
use arbor_types::session::WalkStatus;

use crate::evaluator::EvaluationError;

/// Errors raised while walking a workflow tree.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("node '{0}' not found in workflow")]
    NodeNotFound(String),

    #[error("failed to evaluate {target}: {source}")]
    Evaluation {
        target: String,
        #[source]
        source: EvaluationError,
    },

    #[error("action '{action_key}' did not complete: {source}")]
    ActionTimeout {
        action_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("node '{node_key}' did not complete within {timeout_ms}ms")]
    NodeTimeout { node_key: String, timeout_ms: u64 },

    #[error("walk cancelled")]
    Cancelled,

    #[error("walk cancelled before node '{0}' executed")]
    CancelledBeforeExecution(String),

    #[error("no child selector matched at node '{0}'")]
    NoChildMatched(String),

    #[error("invalid node '{node_key}': {message}")]
    Invariant { node_key: String, message: String },

    #[error("action type '{0}' is not registered")]
    UnknownActionType(String),

    #[error("{hook} hook failed at node '{node_key}': {source}")]
    Hook {
        hook: &'static str,
        node_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("action task failed: {0}")]
    Task(String),

    #[error("subroutine workflow '{0}' is not available")]
    UnknownWorkflow(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl EngineError {
    /// The terminal walk status this error ends a walk with.
    pub fn status(&self) -> WalkStatus {
        match self {
            EngineError::Evaluation { .. } => WalkStatus::FailedEvaluateDynamicProperty,
            EngineError::ActionTimeout { .. } => WalkStatus::TimeoutOnAction,
            EngineError::NodeTimeout { .. } => WalkStatus::TimeoutOnNode,
            EngineError::Cancelled => WalkStatus::Cancelled,
            EngineError::CancelledBeforeExecution(_) => WalkStatus::CancelledBeforeExecution,
            EngineError::NoChildMatched(_) => WalkStatus::RanToCompletionNoChildMatched,
            EngineError::NodeNotFound(_)
            | EngineError::Invariant { .. }
            | EngineError::UnknownActionType(_)
            | EngineError::Hook { .. }
            | EngineError::Task(_)
            | EngineError::UnknownWorkflow(_)
            | EngineError::State(_) => WalkStatus::Failed,
        }
    }

    pub(crate) fn evaluation(target: impl Into<String>, source: EvaluationError) -> Self {
        match source {
            EvaluationError::Cancelled => EngineError::Cancelled,
            source => EngineError::Evaluation {
                target: target.into(),
                source,
            },
        }
    }

    pub(crate) fn invariant(node_key: &str, message: impl Into<String>) -> Self {
        EngineError::Invariant {
            node_key: node_key.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EngineError::NodeNotFound("x".into()).status(),
            WalkStatus::Failed
        );
        assert_eq!(
            EngineError::NoChildMatched("x".into()).status(),
            WalkStatus::RanToCompletionNoChildMatched
        );
        assert_eq!(
            EngineError::ActionTimeout {
                action_key: "a".into(),
                source: anyhow::anyhow!("boom"),
            }
            .status(),
            WalkStatus::TimeoutOnAction
        );
        assert_eq!(
            EngineError::evaluation("input", EvaluationError::Cancelled).status(),
            WalkStatus::Cancelled
        );
        assert_eq!(
            EngineError::evaluation(
                "input",
                EvaluationError::Build {
                    target: "T".into(),
                    message: "m".into()
                }
            )
            .status(),
            WalkStatus::FailedEvaluateDynamicProperty
        );
    }

    #[test]
    fn test_action_timeout_keeps_inner_cause() {
        let err = EngineError::ActionTimeout {
            action_key: "Probe".into(),
            source: anyhow::anyhow!("connection refused"),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection refused");
    }
}
