//! Session-level result types: action responses and walk statuses.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    STATUS_RETRY_EXHAUSTED_ON_ACTION, STATUS_TIMEOUT_ON_ACTION, SYNTHETIC_STATUS_CODE,
};

// ---------------------------------------------------------------------------
// ActionResponse
// ---------------------------------------------------------------------------

/// The canonical result of one action execution.
///
/// Persisted under the action key once the action completes, and visible to
/// later expressions through the session facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ActionResponse {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Value,
}

impl ActionResponse {
    pub fn new(status_code: i64, status: impl Into<String>, output: Value) -> Self {
        Self {
            status_code,
            status: status.into(),
            output,
        }
    }

    /// A successful response with status code 0.
    pub fn success(output: Value) -> Self {
        Self::new(0, "Success", output)
    }

    /// An engine-produced response carrying only a status string.
    pub fn synthetic(status: impl Into<String>, output: Value) -> Self {
        Self::new(SYNTHETIC_STATUS_CODE, status, output)
    }

    /// Response persisted when a deadline hit is absorbed.
    pub fn timeout_on_action(detail: impl Into<String>) -> Self {
        Self::synthetic(
            STATUS_TIMEOUT_ON_ACTION,
            serde_json::json!({ "Error": detail.into() }),
        )
    }

    /// Response persisted when retry exhaustion is absorbed.
    pub fn retry_exhausted(detail: impl Into<String>) -> Self {
        Self::synthetic(
            STATUS_RETRY_EXHAUSTED_ON_ACTION,
            serde_json::json!({ "Error": detail.into() }),
        )
    }
}

// ---------------------------------------------------------------------------
// WalkStatus
// ---------------------------------------------------------------------------

/// State machine status of a tree walk.
///
/// `Initialized` and `Running` are the only non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum WalkStatus {
    Initialized,
    Running,
    RanToCompletion,
    #[serde(rename = "RanToCompletion_NoChildMatched")]
    RanToCompletionNoChildMatched,
    Cancelled,
    CancelledBeforeExecution,
    TimeoutOnAction,
    TimeoutOnNode,
    Failed,
    #[serde(rename = "Failed_EvaluateDynamicProperty")]
    FailedEvaluateDynamicProperty,
}

impl WalkStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WalkStatus::Initialized | WalkStatus::Running)
    }

    /// Terminal statuses that count as a successful walk.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            WalkStatus::RanToCompletion | WalkStatus::RanToCompletionNoChildMatched
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalkStatus::Initialized => "Initialized",
            WalkStatus::Running => "Running",
            WalkStatus::RanToCompletion => "RanToCompletion",
            WalkStatus::RanToCompletionNoChildMatched => "RanToCompletion_NoChildMatched",
            WalkStatus::Cancelled => "Cancelled",
            WalkStatus::CancelledBeforeExecution => "CancelledBeforeExecution",
            WalkStatus::TimeoutOnAction => "TimeoutOnAction",
            WalkStatus::TimeoutOnNode => "TimeoutOnNode",
            WalkStatus::Failed => "Failed",
            WalkStatus::FailedEvaluateDynamicProperty => "Failed_EvaluateDynamicProperty",
        }
    }
}

impl fmt::Display for WalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initialized" => Ok(WalkStatus::Initialized),
            "Running" => Ok(WalkStatus::Running),
            "RanToCompletion" => Ok(WalkStatus::RanToCompletion),
            "RanToCompletion_NoChildMatched" => Ok(WalkStatus::RanToCompletionNoChildMatched),
            "Cancelled" => Ok(WalkStatus::Cancelled),
            "CancelledBeforeExecution" => Ok(WalkStatus::CancelledBeforeExecution),
            "TimeoutOnAction" => Ok(WalkStatus::TimeoutOnAction),
            "TimeoutOnNode" => Ok(WalkStatus::TimeoutOnNode),
            "Failed" => Ok(WalkStatus::Failed),
            "Failed_EvaluateDynamicProperty" => Ok(WalkStatus::FailedEvaluateDynamicProperty),
            other => Err(format!("invalid walk status: '{other}'")),
        }
    }
}

impl Default for WalkStatus {
    fn default() -> Self {
        WalkStatus::Initialized
    }
}
