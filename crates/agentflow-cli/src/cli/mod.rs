//! CLI command definitions for the `agentflow` binary.
//!
//! Uses clap derive macros. Commands are grouped by noun
//! (e.g., `agentflow template list`, `agentflow workflow run`).

pub mod render;
pub mod status;
pub mod template;
pub mod workflow;

use clap::{Parser, Subcommand};

/// Run and manage task workflows.
#[derive(Parser)]
#[command(name = "agentflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "AGENTFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow templates (list, show, import, update, delete).
    Template {
        #[command(subcommand)]
        action: template::TemplateCommand,
    },

    /// Run and control workflows.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Engine status dashboard.
    Status,
}

impl Commands {
    /// Whether the command changes the persisted workflow snapshot.
    ///
    /// Read-only commands leave the snapshot untouched so they never
    /// overwrite what a concurrently running process has written.
    pub fn writes_state(&self) -> bool {
        match self {
            Commands::Workflow { action } => action.writes_state(),
            Commands::Template { .. } | Commands::Status => false,
        }
    }
}

/// Output switches shared by every command handler.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Styled (non-JSON, non-quiet) output is wanted.
    pub fn styled(self) -> bool {
        !self.json && !self.quiet
    }
}
