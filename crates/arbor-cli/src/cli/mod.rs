//! CLI command definitions for the `arbor` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod run;
pub mod schema;
pub mod session;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and inspect declarative workflow trees.
#[derive(Parser)]
#[command(name = "arbor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk a workflow, resuming the session if it already has state.
    Run(RunArgs),

    /// Check a workflow document for structural problems.
    Validate {
        /// Path to the workflow document (YAML or JSON).
        file: PathBuf,
    },

    /// Print the JSON Schema of workflow documents.
    Schema,

    /// Dump the persisted engine state of a session.
    State {
        /// Session id.
        session: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Path to the workflow document (YAML or JSON).
    pub file: PathBuf,

    /// Session id to create or resume (defaults to a fresh UUID).
    #[arg(long)]
    pub session: Option<String>,

    /// Workflow input as JSON. Ignored when the session already exists.
    #[arg(long)]
    pub input: Option<String>,

    /// Caller context as JSON, visible to expressions as `context`.
    #[arg(long)]
    pub context: Option<String>,

    /// Node to start from instead of the persisted or root node.
    #[arg(long)]
    pub start: Option<String>,

    /// Directory of workflows available to subroutine actions.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Re-run the actions of the first node even if they already completed.
    #[arg(long)]
    pub force_rerun: bool,
}
