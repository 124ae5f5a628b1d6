//! Action execution engine.
//!
//! Runs a node's pending actions concurrently via `tokio::JoinSet`, racing a
//! single node deadline. Each action runs its own retry loop racing the
//! action's deadline:
//!
//! 1. Evaluate timeout and properties once, the input on every attempt.
//! 2. Race the attempt against the action deadline and walk cancellation.
//! 3. On success, persist the response and last-action marker in one batch.
//! 4. On failure, consult the retry schedule; never sleep past the deadline.
//! 5. Exhaustion or deadline either escalate as `ActionTimeout` or are
//!    absorbed into a synthetic response when the matching continuation flag
//!    is set.

use std::sync::Arc;
use std::time::Duration;

use arbor_types::session::ActionResponse;
use arbor_types::workflow::{ActionSpec, Node};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionContext, ActionFailure};
use crate::error::EngineError;
use crate::evaluator::EvaluationError;
use crate::retry::RetrySchedule;
use crate::walker::session::SessionEnv;

// ---------------------------------------------------------------------------
// Node level
// ---------------------------------------------------------------------------

/// Run every action of `node` that has no persisted response yet.
///
/// Returns once all of them have completed or been absorbed. The first action
/// error aborts the remaining tasks and propagates.
pub(crate) async fn run_node_actions(
    env: &Arc<SessionEnv>,
    node_key: &str,
    node: &Node,
    cancellation: &CancellationToken,
) -> Result<(), EngineError> {
    if node.actions.is_empty() {
        return Ok(());
    }

    let responded = env.store.responses().await?;
    let mut pending: Vec<(String, ActionSpec)> = Vec::new();
    for (action_key, spec) in node.actions.iter() {
        if responded.contains_key(action_key) {
            tracing::debug!(node_key, action_key, "action already has a response, skipping");
            continue;
        }
        pending.push((action_key.to_string(), spec.clone()));
    }

    if pending.is_empty() {
        return Ok(());
    }

    let timeout_ms = match &node.timeout {
        Some(raw) => {
            let scope = env.scope(cancellation).await?;
            env.services
                .evaluator
                .evaluate_as::<Option<u64>>(Some(raw), &scope)
                .await
                .map_err(|e| EngineError::evaluation(format!("timeout of node '{node_key}'"), e))?
        }
        None => None,
    }
    .or(env.services.config.default_node_timeout_ms);

    let mut tasks = JoinSet::new();
    for (action_key, spec) in pending {
        let env = Arc::clone(env);
        let node_key = node_key.to_string();
        let cancellation = cancellation.child_token();
        tasks.spawn(async move {
            run_action(&env, &node_key, &action_key, &spec, &cancellation).await
        });
    }

    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(join_error) => return Err(EngineError::Task(join_error.to_string())),
            }
        }
        Ok(())
    };

    let deadline = until(timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms)));

    tokio::select! {
        result = drain => result,
        _ = deadline => Err(EngineError::NodeTimeout {
            node_key: node_key.to_string(),
            timeout_ms: timeout_ms.unwrap_or_default(),
        }),
        _ = cancellation.cancelled() => Err(EngineError::Cancelled),
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Action level
// ---------------------------------------------------------------------------

/// What ended the retry loop without a successful response.
enum GiveUp {
    Deadline(Option<anyhow::Error>),
    Exhausted(anyhow::Error),
}

/// Run one action to completion under its timeout and retry policy.
pub(crate) async fn run_action(
    env: &Arc<SessionEnv>,
    node_key: &str,
    action_key: &str,
    spec: &ActionSpec,
    cancellation: &CancellationToken,
) -> Result<(), EngineError> {
    let started = Instant::now();
    let evaluator = &env.services.evaluator;

    let implementation = env
        .services
        .registry
        .get(&spec.action_type)
        .ok_or_else(|| EngineError::UnknownActionType(spec.action_type.clone()))?;
    let input_hint = implementation.input_hint();

    let scope = env.scope(cancellation).await?;
    let timeout_ms = evaluator
        .evaluate_as::<Option<u64>>(spec.timeout.as_ref(), &scope)
        .await
        .map_err(|e| EngineError::evaluation(format!("timeout of action '{action_key}'"), e))?;
    let properties = match &spec.properties {
        Some(raw) => evaluator
            .evaluate(raw, None, &scope)
            .await
            .map_err(|e| EngineError::evaluation(format!("properties of action '{action_key}'"), e))?,
        None => Value::Null,
    };
    let previous_response = env.store.previous_response(action_key).await?;
    let deadline = timeout_ms.map(|ms| started + Duration::from_millis(ms));

    let mut schedule = RetrySchedule::new(spec.retry_policy.as_ref());
    let mut attempt: u32 = 0;

    let give_up = loop {
        if deadline.is_some_and(|at| Instant::now() >= at) {
            break GiveUp::Deadline(None);
        }
        attempt += 1;

        let scope = env.scope(cancellation).await?;
        let input = match &spec.input {
            Some(raw) => evaluator.evaluate(raw, Some(&input_hint), &scope).await,
            None => Ok(Value::Null),
        }
        .map_err(|e| EngineError::evaluation(format!("input of action '{action_key}'"), e))?;

        let ctx = ActionContext {
            node_key: node_key.to_string(),
            action_key: action_key.to_string(),
            input,
            properties: properties.clone(),
            previous_response: previous_response.clone(),
            attempt,
            cancellation: cancellation.clone(),
            env: Arc::clone(env),
        };

        tracing::debug!(node_key, action_key, attempt, "starting action attempt");
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(EngineError::Cancelled),
            _ = until(deadline) => break GiveUp::Deadline(None),
            outcome = implementation.execute_boxed(ctx) => outcome,
        };

        let error = match outcome {
            Ok(response) => {
                env.store.commit_response(action_key, &response).await?;
                tracing::debug!(
                    node_key,
                    action_key,
                    attempt,
                    status = %response.status,
                    "action completed"
                );
                return Ok(());
            }
            Err(ActionFailure::Input(e)) => {
                return Err(EngineError::evaluation(
                    format!("input of action '{action_key}'"),
                    EvaluationError::Build {
                        target: spec.action_type.clone(),
                        message: e.to_string(),
                    },
                ));
            }
            Err(ActionFailure::Failed(e)) => e,
        };

        if cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let Some(wait) = schedule.next_wait() else {
            break GiveUp::Exhausted(error);
        };
        if deadline.is_some_and(|at| Instant::now() + wait >= at) {
            break GiveUp::Deadline(Some(error));
        }

        tracing::debug!(
            node_key,
            action_key,
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %error,
            "action attempt failed, retrying"
        );
        tokio::select! {
            _ = cancellation.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    };

    match give_up {
        GiveUp::Deadline(last_error) => {
            // Stop whatever the in-flight attempt left behind.
            cancellation.cancel();
            let source = last_error.unwrap_or_else(|| {
                anyhow::anyhow!(
                    "deadline of {}ms exceeded after {attempt} attempt(s)",
                    timeout_ms.unwrap_or_default()
                )
            });
            if spec.continuation_on_timeout {
                tracing::warn!(node_key, action_key, error = %source, "absorbing action timeout");
                let response = ActionResponse::timeout_on_action(source.to_string());
                env.store.commit_response(action_key, &response).await?;
                return Ok(());
            }
            Err(EngineError::ActionTimeout {
                action_key: action_key.to_string(),
                source,
            })
        }
        GiveUp::Exhausted(source) => {
            if spec.continuation_on_retry_exhaustion {
                tracing::warn!(
                    node_key,
                    action_key,
                    attempts = attempt,
                    error = %source,
                    "absorbing retry exhaustion"
                );
                let response = ActionResponse::retry_exhausted(source.to_string());
                env.store.commit_response(action_key, &response).await?;
                return Ok(());
            }
            Err(EngineError::ActionTimeout {
                action_key: action_key.to_string(),
                source,
            })
        }
    }
}
