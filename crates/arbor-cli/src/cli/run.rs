//! `arbor run`: walk a workflow document against the persistent state store.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::Value;

use arbor_core::action::ActionRegistry;
use arbor_core::document::{load_workflow_file, unregistered_actions};
use arbor_core::hooks::{BoxVisitHooks, TracingHooks};
use arbor_core::services::EngineServices;
use arbor_core::subroutine::WorkflowCatalog;
use arbor_core::walker::{SessionOptions, TreeWalker, WalkOutcome};
use arbor_infra::catalog::load_catalog;

use super::RunArgs;
use crate::state::AppState;

/// Run (or resume) one session of the workflow in `args.file`.
///
/// Fails unless the walk ends in one of the completion statuses.
pub async fn run(state: &AppState, args: RunArgs, json: bool) -> Result<()> {
    let tree = load_workflow_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;

    let registry = ActionRegistry::with_builtins();
    let unknown = unregistered_actions(&tree, &registry);
    if let Some(first) = unknown.first() {
        bail!(
            "workflow '{}' uses {} action type(s) this binary cannot run: {first}",
            tree.name,
            unknown.len()
        );
    }

    let mut catalog = match &args.catalog {
        Some(dir) => load_catalog(dir),
        None => WorkflowCatalog::new(),
    };
    if catalog.get(&tree.name).is_none() {
        catalog.insert(tree.clone());
    }

    let input = parse_json_arg("--input", args.input.as_deref())?;
    let user_context = parse_json_arg("--context", args.context.as_deref())?;
    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let services = EngineServices::new(state.backend.clone())
        .with_registry(registry)
        .with_config(state.config.clone())
        .with_hooks(BoxVisitHooks::new(TracingHooks))
        .with_subroutines(catalog);

    let options = SessionOptions::new(&session_id)
        .with_input(input)
        .with_user_context(user_context)
        .with_force_rerun(args.force_rerun);

    let walker = TreeWalker::open(Arc::new(tree), services, options)
        .await
        .with_context(|| format!("failed to open session '{session_id}'"))?;

    let token = walker.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling walk");
            token.cancel();
        }
    });

    let outcome = match &args.start {
        Some(node_key) => walker.walk_tree(node_key).await,
        None => walker.resume().await,
    };

    report(&walker, &outcome, json)?;

    if outcome.status.is_success() {
        return Ok(());
    }
    let summary = format!("walk of session '{session_id}' ended with {}", outcome.status);
    match outcome.error {
        Some(e) => Err(anyhow::Error::new(e).context(summary)),
        None => bail!(summary),
    }
}

fn parse_json_arg(flag: &str, raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => {
            serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
        }
        None => Ok(Value::Null),
    }
}

fn report(walker: &TreeWalker, outcome: &WalkOutcome, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "session_id": walker.session_id(),
            "workflow": &walker.tree().name,
            "status": outcome.status,
            "last_response": &outcome.last_response,
            "error": outcome.error.as_ref().map(|e| format!("{e:#}")),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let marker = if outcome.status.is_success() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!();
    println!(
        "  {marker} Workflow '{}' finished: {}",
        style(&walker.tree().name).cyan(),
        style(outcome.status).bold()
    );
    println!("  Session: {}", walker.session_id());
    if let Some(response) = &outcome.last_response {
        println!(
            "  Last response: {} ({})",
            response.status,
            response.status_code
        );
        if !response.output.is_null() {
            println!("  Output: {}", response.output);
        }
    }
    if let Some(e) = &outcome.error {
        println!("  Error: {}", style(e).red());
    }
    println!();
    Ok(())
}
