//! CLI template management subcommands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use agentflow_core::workflow::dag;
use agentflow_core::workflow::template::{TemplateFormat, parse_template_document};
use agentflow_types::template::{Template, TemplatePatch};

use super::Output;
use super::render::{print_json, truncate};
use crate::state::AppState;

/// Template management subcommands.
#[derive(Subcommand)]
pub enum TemplateCommand {
    /// List stored templates.
    #[command(alias = "ls")]
    List,

    /// Show a template's tasks and execution waves.
    Show {
        /// Template ID or name.
        target: String,
    },

    /// Import a template from a JSON or YAML file.
    Import {
        /// Path to the template document (.json, .yaml, .yml).
        file: PathBuf,
    },

    /// Update template metadata. Changing --version creates a new template.
    Update {
        /// Template ID or name.
        target: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        author: Option<String>,
    },

    /// Delete a template.
    #[command(alias = "rm")]
    Delete {
        /// Template ID or name.
        target: String,
    },
}

/// Handle a template subcommand.
pub async fn handle_template_command(
    cmd: TemplateCommand,
    state: &AppState,
    out: Output,
) -> Result<()> {
    match cmd {
        TemplateCommand::List => handle_list(state, out),
        TemplateCommand::Show { target } => handle_show(&target, state, out),
        TemplateCommand::Import { file } => handle_import(&file, state, out).await,
        TemplateCommand::Update {
            target,
            name,
            description,
            version,
            author,
        } => {
            let patch = TemplatePatch {
                name,
                description,
                version,
                author,
                ..TemplatePatch::default()
            };
            handle_update(&target, patch, state, out).await
        }
        TemplateCommand::Delete { target } => handle_delete(&target, state, out).await,
    }
}

fn resolve(state: &AppState, target: &str) -> Result<Template> {
    state
        .engine
        .resolve_template(target)
        .with_context(|| format!("Template '{target}' not found"))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

fn handle_list(state: &AppState, out: Output) -> Result<()> {
    let templates = state.engine.list_templates();

    if out.json {
        return print_json(&templates);
    }
    if out.quiet {
        return Ok(());
    }

    if templates.is_empty() {
        println!();
        println!("  No templates stored.");
        println!(
            "  Import one with: {}",
            style("agentflow template import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Tasks"),
            Cell::new("ID"),
            Cell::new("Created"),
        ]);

    for t in &templates {
        table.add_row(vec![
            Cell::new(&t.name),
            Cell::new(&t.version),
            Cell::new(t.tasks.len()),
            Cell::new(t.id),
            Cell::new(t.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

fn handle_show(target: &str, state: &AppState, out: Output) -> Result<()> {
    let template = resolve(state, target)?;
    let report = dag::analyze(&template.tasks);

    if out.json {
        let value = serde_json::json!({
            "template": template,
            "waves": report.waves,
            "unknown_dependencies": report.unknown_dependencies,
            "cycle": report.cycle,
        });
        return print_json(&value);
    }
    if out.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&template.name).cyan().bold(),
        style(format!("v{}", template.version)).dim()
    );
    println!("  ID: {}", template.id);
    if let Some(description) = &template.description {
        println!("  {description}");
    }
    if let Some(author) = &template.author {
        println!("  Author: {author}");
    }
    if !template.variables.is_empty() {
        let mut keys: Vec<&String> = template.variables.keys().collect();
        keys.sort();
        println!(
            "  Variables: {}",
            keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Action"),
            Cell::new("Depends On"),
            Cell::new("Conditions"),
        ]);
    for task in &template.tasks {
        table.add_row(vec![
            Cell::new(truncate(&task.id, 36)),
            Cell::new(&task.name),
            Cell::new(&task.action),
            Cell::new(task.dependencies.join(", ")),
            Cell::new(task.conditions.len()),
        ]);
    }
    println!("{table}");
    println!();

    for (depth, wave) in report.waves.iter().enumerate() {
        println!("  Wave {}: {}", depth + 1, wave.join(", "));
    }
    for (task_id, dep) in &report.unknown_dependencies {
        println!(
            "  {} task '{}' depends on unknown task '{}'",
            style("!").yellow().bold(),
            task_id,
            dep
        );
    }
    if let Some(task_id) = &report.cycle {
        println!(
            "  {} dependency cycle through task '{}'",
            style("!").red().bold(),
            task_id
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

async fn handle_import(file: &Path, state: &AppState, out: Output) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let spec = parse_template_document(&content, TemplateFormat::from_path(file))?;
    if spec.tasks.is_empty() {
        bail!("Template '{}' has no tasks", spec.name);
    }

    let template = state.engine.create_template(spec).await?;

    if out.json {
        return print_json(&template);
    }
    if out.styled() {
        println!();
        println!(
            "  {} Imported template '{}'",
            style("*").green().bold(),
            style(&template.name).cyan()
        );
        println!("  ID: {}", template.id);
        println!("  Tasks: {}", template.tasks.len());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

async fn handle_update(
    target: &str,
    patch: TemplatePatch,
    state: &AppState,
    out: Output,
) -> Result<()> {
    let template = resolve(state, target)?;
    let updated = state.engine.update_template(&template.id, patch).await?;

    if out.json {
        return print_json(&updated);
    }
    if out.styled() {
        println!();
        if updated.id == template.id {
            println!(
                "  {} Updated template '{}'",
                style("*").green().bold(),
                style(&updated.name).cyan()
            );
        } else {
            println!(
                "  {} Created '{}' v{} (previous version kept as {})",
                style("*").green().bold(),
                style(&updated.name).cyan(),
                updated.version,
                template.id
            );
        }
        println!("  ID: {}", updated.id);
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(target: &str, state: &AppState, out: Output) -> Result<()> {
    let template = resolve(state, target)?;
    state.engine.delete_template(&template.id).await?;

    if out.json {
        return print_json(&serde_json::json!({ "deleted": template.id }));
    }
    if out.styled() {
        println!();
        println!(
            "  {} Deleted template '{}'",
            style("*").green().bold(),
            style(&template.name).cyan()
        );
        println!();
    }
    Ok(())
}
