//! CLI workflow subcommands.
//!
//! `run`, `start` and `resume` drive the workflow in this process and wait
//! for it to finish; the engine is closed when the command returns.
//!
//! Each invocation works on its own copy of the snapshot. `pause` and
//! `cancel` only stick for workflows no other process is driving: a
//! concurrent `run` keeps writing its own view of the workflow.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use uuid::Uuid;

use agentflow_core::workflow::template::TemplateFormat;
use agentflow_types::event::WorkflowEvent;
use agentflow_types::workflow::{Workflow, WorkflowOptions, WorkflowSpec, WorkflowStatus};

use super::Output;
use super::render::{
    format_duration, parse_key_value, parse_workflow_id, print_json, styled_workflow_status,
    task_detail, task_status_cell, truncate, workflow_status_cell,
};
use crate::state::AppState;

/// Default wait bound for commands that drive a workflow.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Workflow subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Instantiate a template and run it to completion.
    Run {
        /// Template ID or name.
        template: String,

        /// Context entries (key=value, value parsed as JSON when possible).
        #[arg(long = "context", short = 'c', value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Owner recorded on the workflow.
        #[arg(long)]
        owner: Option<String>,

        /// Create the workflow without starting it.
        #[arg(long)]
        no_start: bool,

        /// Seconds to wait before giving up (the workflow stays persisted).
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Create a workflow from a JSON or YAML definition file.
    Create {
        file: PathBuf,

        #[arg(long = "context", short = 'c', value_name = "KEY=VALUE")]
        context: Vec<String>,

        #[arg(long)]
        owner: Option<String>,

        /// Start it and wait for completion.
        #[arg(long)]
        start: bool,

        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Start a pending workflow and wait for completion.
    Start {
        id: String,

        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// List workflows.
    #[command(alias = "ls")]
    List {
        /// Only show workflows with this status.
        #[arg(long)]
        status: Option<WorkflowStatus>,
    },

    /// Show a workflow and its tasks.
    Show { id: String },

    /// Pause a running workflow that no other agentflow process is driving.
    Pause { id: String },

    /// Resume a paused or interrupted workflow and wait for completion.
    ///
    /// Tasks left Running by an earlier process are dispatched again.
    Resume {
        id: String,

        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Cancel a workflow that no other agentflow process is driving.
    Cancel { id: String },
}

impl WorkflowCommand {
    /// Whether the command changes the persisted snapshot.
    pub fn writes_state(&self) -> bool {
        !matches!(self, WorkflowCommand::List { .. } | WorkflowCommand::Show { .. })
    }
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    out: Output,
) -> Result<()> {
    match cmd {
        WorkflowCommand::Run {
            template,
            context,
            owner,
            no_start,
            timeout,
        } => {
            let options = build_options(&context, owner)?;
            let workflow = state
                .engine
                .create_workflow_from_template(&template, options)
                .await?;
            after_create(workflow, !no_start, timeout, state, out).await
        }
        WorkflowCommand::Create {
            file,
            context,
            owner,
            start,
            timeout,
        } => {
            let spec = load_workflow_file(&file).await?;
            let options = build_options(&context, owner)?;
            let workflow = state.engine.create_workflow(spec, options).await?;
            after_create(workflow, start, timeout, state, out).await
        }
        WorkflowCommand::Start { id, timeout } => {
            let id = parse_workflow_id(&id)?;
            drive(&id, timeout, state, out, |engine, id| async move {
                engine.start(&id).await.map(|_| ())
            })
            .await
        }
        WorkflowCommand::List { status } => handle_list(status, state, out),
        WorkflowCommand::Show { id } => handle_show(&parse_workflow_id(&id)?, state, out),
        WorkflowCommand::Pause { id } => {
            let workflow = state.engine.pause(&parse_workflow_id(&id)?).await?;
            report_transition(&workflow, WorkflowStatus::Paused, "Paused", out)
        }
        WorkflowCommand::Resume { id, timeout } => {
            let id = parse_workflow_id(&id)?;
            drive(&id, timeout, state, out, |engine, id| async move {
                engine.requeue_interrupted_tasks(&id).await?;
                let workflow = engine.resume(&id).await?;
                // Running but undriven: left behind by an earlier process.
                if workflow.status == WorkflowStatus::Running {
                    engine.scheduler().ensure_driver(id);
                }
                Ok(())
            })
            .await
        }
        WorkflowCommand::Cancel { id } => {
            let workflow = state.engine.cancel(&parse_workflow_id(&id)?).await?;
            report_transition(&workflow, WorkflowStatus::Cancelled, "Cancelled", out)
        }
    }
}

fn build_options(context: &[String], owner: Option<String>) -> Result<WorkflowOptions> {
    let mut options = WorkflowOptions {
        owner,
        ..WorkflowOptions::default()
    };
    for raw in context {
        let (key, value) = parse_key_value(raw)?;
        options.context.insert(key, value);
    }
    Ok(options)
}

/// Parse a workflow definition document by file extension.
pub async fn load_workflow_file(path: &Path) -> Result<WorkflowSpec> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let spec: WorkflowSpec = match TemplateFormat::from_path(path) {
        TemplateFormat::Json => {
            serde_json::from_str(&content).with_context(|| "Invalid workflow JSON")?
        }
        TemplateFormat::Yaml => {
            serde_yaml_ng::from_str(&content).with_context(|| "Invalid workflow YAML")?
        }
    };
    if spec.tasks.is_empty() {
        bail!("Workflow '{}' has no tasks", spec.name);
    }
    Ok(spec)
}

async fn after_create(
    workflow: Workflow,
    start: bool,
    timeout: u64,
    state: &AppState,
    out: Output,
) -> Result<()> {
    if !start {
        if out.json {
            return print_json(&workflow);
        }
        if out.styled() {
            println!();
            println!(
                "  {} Created workflow '{}'",
                style("*").green().bold(),
                style(&workflow.name).cyan()
            );
            println!("  ID: {}", workflow.id);
            println!(
                "  Start it with: {}",
                style(format!("agentflow workflow start {}", workflow.id)).dim()
            );
            println!();
        }
        return Ok(());
    }

    drive(&workflow.id, timeout, state, out, |engine, id| async move {
        engine.start(&id).await.map(|_| ())
    })
    .await
}

// ---------------------------------------------------------------------------
// Driving
// ---------------------------------------------------------------------------

/// Kick the workflow with `kick`, stream its events, and wait until it is
/// terminal or `timeout_secs` elapse.
async fn drive<F, Fut>(
    id: &Uuid,
    timeout_secs: u64,
    state: &AppState,
    out: Output,
    kick: F,
) -> Result<()>
where
    F: FnOnce(crate::state::Engine, Uuid) -> Fut,
    Fut: std::future::Future<Output = Result<(), agentflow_types::error::EngineError>>,
{
    let engine = state.engine.clone();
    let mut rx = engine.subscribe();
    let workflow_id = *id;

    let printer = out.styled().then(|| {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.workflow_id() == Some(workflow_id) => print_event(&event),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    if out.styled() {
        println!();
        println!("  Running workflow {}", style(workflow_id).cyan());
        println!();
    }

    kick(engine.clone(), workflow_id).await?;

    let waited = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        engine.wait_for_completion(&workflow_id),
    )
    .await;

    if let Some(printer) = printer {
        // Let the printer drain events already queued.
        tokio::task::yield_now().await;
        printer.abort();
    }

    let workflow = match waited {
        Ok(result) => result?,
        Err(_) => {
            let workflow = engine
                .get_workflow(&workflow_id)
                .with_context(|| format!("Workflow {workflow_id} disappeared"))?;
            if out.json {
                print_json(&workflow)?;
            }
            bail!(
                "Workflow {workflow_id} still {} after {timeout_secs}s; resume it with `agentflow workflow resume {workflow_id}`",
                workflow.status
            );
        }
    };

    if out.json {
        return print_json(&workflow);
    }
    if out.styled() {
        println!();
        println!(
            "  Workflow '{}' {}",
            style(&workflow.name).cyan(),
            styled_workflow_status(workflow.status)
        );
        println!();
        print_task_table(&workflow);
    }
    if workflow.status == WorkflowStatus::Failed {
        bail!("Workflow {} failed", workflow.id);
    }
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::TaskStarted { task_id, .. } => {
            println!("  {} {}", style("▸").cyan(), task_id);
        }
        WorkflowEvent::TaskCompleted {
            task_id, success, ..
        } => {
            if *success {
                println!("  {} {}", style("✓").green(), task_id);
            } else {
                println!("  {} {}", style("✗").red(), task_id);
            }
        }
        WorkflowEvent::TaskFailed { task_id, error, .. } => {
            println!(
                "  {} {} {}",
                style("✗").red(),
                task_id,
                style(truncate(error, 80)).dim()
            );
        }
        WorkflowEvent::TaskSkipped { task_id, .. } => {
            println!("  {} {}", style("-").dim(), style(task_id).dim());
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// List / Show
// ---------------------------------------------------------------------------

fn handle_list(status: Option<WorkflowStatus>, state: &AppState, out: Output) -> Result<()> {
    let workflows: Vec<Workflow> = state
        .engine
        .list_workflows()
        .into_iter()
        .filter(|w| status.is_none_or(|s| w.status == s))
        .collect();

    if out.json {
        let rows: Vec<Value> = workflows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "id": w.id,
                    "name": w.name,
                    "status": w.status,
                    "tasks": w.tasks.len(),
                    "owner": w.owner,
                    "template_id": w.template_id,
                    "created_at": w.created_at.to_rfc3339(),
                })
            })
            .collect();
        return print_json(&rows);
    }
    if out.quiet {
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows.");
        println!(
            "  Run one with: {}",
            style("agentflow workflow run <template>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Tasks"),
            Cell::new("Created"),
        ]);
    for w in &workflows {
        let done = w.tasks.iter().filter(|t| t.is_terminal()).count();
        table.add_row(vec![
            Cell::new(w.id),
            Cell::new(&w.name),
            workflow_status_cell(w.status),
            Cell::new(format!("{done}/{}", w.tasks.len())),
            Cell::new(w.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn handle_show(id: &Uuid, state: &AppState, out: Output) -> Result<()> {
    let workflow = state
        .engine
        .get_workflow(id)
        .with_context(|| format!("Workflow {id} not found"))?;

    if out.json {
        return print_json(&workflow);
    }
    if out.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&workflow.name).cyan().bold(),
        styled_workflow_status(workflow.status)
    );
    println!("  ID: {}", workflow.id);
    if let Some(template_id) = workflow.template_id {
        println!("  Template: {template_id}");
    }
    if let Some(owner) = &workflow.owner {
        println!("  Owner: {owner}");
    }
    println!("  Created: {}", workflow.created_at.to_rfc3339());
    if let Some(started) = workflow.started_at {
        println!("  Started: {}", started.to_rfc3339());
    }
    if let Some(completed) = workflow.completed_at {
        println!("  Finished: {}", completed.to_rfc3339());
    }
    println!();
    print_task_table(&workflow);

    if !workflow.context.is_empty() {
        let mut entries: Vec<(&String, &Value)> = workflow.context.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        println!("  {}", style("── Context ──").dim());
        for (key, value) in entries {
            println!("  {key} = {}", truncate(&value.to_string(), 80));
        }
        println!();
    }
    Ok(())
}

fn print_task_table(workflow: &Workflow) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Action"),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Detail"),
        ]);
    for task in &workflow.tasks {
        table.add_row(vec![
            Cell::new(truncate(&task.name, 40)),
            Cell::new(&task.action),
            task_status_cell(task.status),
            Cell::new(format_duration(task)),
            Cell::new(task_detail(task)),
        ]);
    }
    println!("{table}");
    println!();
}

fn report_transition(
    workflow: &Workflow,
    wanted: WorkflowStatus,
    verb: &str,
    out: Output,
) -> Result<()> {
    if out.json {
        return print_json(workflow);
    }
    if out.styled() {
        println!();
        if workflow.status == wanted {
            println!(
                "  {} {verb} workflow '{}'",
                style("*").green().bold(),
                style(&workflow.name).cyan()
            );
        } else {
            println!(
                "  {} Workflow '{}' is {}; nothing to do",
                style("!").yellow().bold(),
                style(&workflow.name).cyan(),
                styled_workflow_status(workflow.status)
            );
        }
        println!();
    }
    Ok(())
}
