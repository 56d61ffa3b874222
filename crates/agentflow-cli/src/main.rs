//! agentflow CLI entry point.
//!
//! Binary name: `agentflow`
//!
//! Parses arguments, sets up tracing, opens the engine against the data
//! directory, then dispatches to the command handler.

mod cli;
mod executors;
mod state;

use clap::Parser;

use agentflow_observe::{TracingConfig, init_tracing, shutdown_tracing};
use cli::{Cli, Commands, Output};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig {
        filter: None,
        json: cli.log_json,
        otel: cli.otel,
    }
    .with_verbosity(cli.verbose);
    if cli.quiet && cli.verbose == 0 {
        tracing_config.filter = Some("error".to_string());
    }
    if let Err(e) = init_tracing(&tracing_config) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let state = AppState::init().await?;
    let writes_state = cli.command.writes_state();

    let result = match cli.command {
        Commands::Template { action } => {
            cli::template::handle_template_command(action, &state, out).await
        }
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, out).await
        }
        Commands::Status => cli::status::status(&state, out),
    };

    state.close(writes_state).await;
    shutdown_tracing();
    result
}
