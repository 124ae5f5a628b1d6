//! Process-wide constant table.
//!
//! Every marker, key segment, and synthetic status string the engine relies on
//! lives here so that stores, evaluators, and tooling agree on one spelling.

/// Prefix that marks a string schema value as an embedded expression.
///
/// An optional result-type hint may follow immediately, e.g. `=><int> 1 + 2`.
pub const EXPRESSION_PREFIX: &str = "=>";

/// Registered name of the subroutine composition action.
pub const SUBROUTINE_ACTION_TYPE: &str = "Subroutine";

/// Registered name of the leaf summary action.
pub const SUMMARY_ACTION_TYPE: &str = "Summary";

/// Registered name of the cancellable delay action.
pub const DELAY_ACTION_TYPE: &str = "Delay";

/// Status persisted when a deadline hit is absorbed by `ContinuationOnTimeout`.
pub const STATUS_TIMEOUT_ON_ACTION: &str = "TimeoutOnAction";

/// Status persisted when retry exhaustion is absorbed by `ContinuationOnRetryExhaustion`.
pub const STATUS_RETRY_EXHAUSTED_ON_ACTION: &str = "RetryExhaustedOnAction";

/// Status code carried by every synthetic (engine-produced) response.
pub const SYNTHETIC_STATUS_CODE: i64 = -1;

// ---------------------------------------------------------------------------
// Persisted key layout (relative to the session scope)
// ---------------------------------------------------------------------------

/// Separator between scope segments and key segments.
pub const KEY_SEPARATOR: char = '/';

/// Key of the node currently being visited.
pub const KEY_CURRENT_NODE: &str = "CurrentNode";

/// Key of the last action whose response was persisted.
pub const KEY_LAST_COMPLETED_ACTION: &str = "LastCompletedAction";

/// Key echoing the workflow input the session was created with.
pub const KEY_TREE_INPUT: &str = "TreeInput";

/// Namespace holding per-action records.
pub const KEY_ACTIONS: &str = "Actions";

/// Per-action record: the persisted `ActionResponse`.
pub const KEY_RESPONSE: &str = "Response";

/// Per-action record: durable scratch state shared across retries.
pub const KEY_INTERMEDIATES: &str = "Intermediates";

/// Per-action record: the response from before the latest revisit.
pub const KEY_PREVIOUS_RESPONSE: &str = "PreviousResponse";
