//! Arbor CLI entry point.
//!
//! Binary name: `arbor`
//!
//! Parses CLI arguments, initializes tracing and the state database, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use arbor_observe::{TracingOptions, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.otel {
        let options = TracingOptions {
            verbosity: cli.verbose,
            otel: true,
            ..TracingOptions::default()
        };
        if let Err(e) = init_tracing(&options) {
            eprintln!("Warning: failed to initialize tracing: {e}");
        }
    } else {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "warn",
            1 => "warn,arbor_core=info,arbor_cli=info",
            2 => "info,arbor_core=debug,arbor_infra=debug,arbor_cli=debug",
            _ => "trace",
        };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "arbor", &mut std::io::stdout());
            Ok(())
        }
        Commands::Schema => cli::schema::schema(),
        Commands::Validate { file } => cli::validate::validate(&file, cli.json),
        Commands::Run(args) => {
            let state = AppState::init().await?;
            cli::run::run(&state, args, cli.json).await
        }
        Commands::State { session } => {
            let state = AppState::init().await?;
            cli::session::dump_session(&state, &session, cli.json).await
        }
    }
}
