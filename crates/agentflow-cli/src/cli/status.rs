//! Engine status dashboard command.

use anyhow::Result;
use console::style;

use agentflow_types::workflow::WorkflowStatus;

use super::Output;
use super::render::print_json;
use crate::state::AppState;

const STATUSES: [WorkflowStatus; 6] = [
    WorkflowStatus::Pending,
    WorkflowStatus::Running,
    WorkflowStatus::Paused,
    WorkflowStatus::Completed,
    WorkflowStatus::Failed,
    WorkflowStatus::Cancelled,
];

/// Display workflow counts by status, template count, executors and storage.
pub fn status(state: &AppState, out: Output) -> Result<()> {
    let engine = &state.engine;
    let workflows = engine.list_workflows();
    let counts: Vec<(WorkflowStatus, usize)> = STATUSES
        .iter()
        .map(|s| (*s, workflows.iter().filter(|w| w.status == *s).count()))
        .collect();
    let templates = engine.list_templates().len();
    let active = engine.active_workflows().len();
    let actions = engine.executors().actions();
    let config = engine.config();

    if out.json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(s, n)| (s.to_string(), serde_json::json!(n)))
            .collect();
        return print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "storage": config.storage.backend.to_string(),
            "workflows": {
                "total": workflows.len(),
                "active": active,
                "by_status": by_status,
            },
            "templates": templates,
            "actions": actions,
        }));
    }
    if out.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} agentflow v{}",
        style("⚙").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Total:     {}", style(workflows.len()).bold());
    println!("  Active:    {}", style(active).cyan());
    for (s, n) in &counts {
        if *n > 0 {
            println!("  {:<10} {}", format!("{s}:"), n);
        }
    }
    println!();

    println!("  {}", style("── Templates ──").dim());
    println!("  Stored: {}", style(templates).bold());
    println!();

    println!("  {}", style("── Executors ──").dim());
    println!("  {}", actions.join(", "));
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Storage:  {}", style(config.storage.backend).dim());
    if let Some(dir) = &config.template_dir {
        println!("  Templates: {}", style(dir.display()).dim());
    }
    println!();

    Ok(())
}
