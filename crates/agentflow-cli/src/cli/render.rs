//! Shared formatting and argument-parsing helpers for CLI output.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color};
use console::style;
use serde_json::Value;

use agentflow_types::task::{Task, TaskStatus};
use agentflow_types::workflow::WorkflowStatus;

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    let color = match status {
        WorkflowStatus::Pending => Color::White,
        WorkflowStatus::Running => Color::Cyan,
        WorkflowStatus::Paused => Color::Yellow,
        WorkflowStatus::Completed => Color::Green,
        WorkflowStatus::Failed => Color::Red,
        WorkflowStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

pub fn task_status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Pending => Color::White,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Skipped | TaskStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

/// Colored status word for inline (non-table) output.
pub fn styled_workflow_status(status: WorkflowStatus) -> String {
    let s = status.to_string();
    match status {
        WorkflowStatus::Completed => style(s).green().to_string(),
        WorkflowStatus::Failed => style(s).red().to_string(),
        WorkflowStatus::Running => style(s).cyan().to_string(),
        WorkflowStatus::Paused => style(s).yellow().to_string(),
        WorkflowStatus::Pending | WorkflowStatus::Cancelled => style(s).dim().to_string(),
    }
}

/// Human-readable task duration, `-` when the task has not finished.
pub fn format_duration(task: &Task) -> String {
    match task.duration_ms() {
        Some(ms) if ms >= 1000 => format!("{:.1}s", ms as f64 / 1000.0),
        Some(ms) => format!("{ms}ms"),
        None => "-".to_string(),
    }
}

/// One-line summary of a task's result or error for table cells.
pub fn task_detail(task: &Task) -> String {
    if let Some(error) = &task.error {
        return truncate(error, 60);
    }
    match &task.result {
        Some(Value::Null) | None => String::new(),
        Some(value) => truncate(&value.to_string(), 60),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Parse `key=value`. The value is read as JSON when it parses, otherwise
/// kept as a plain string (`name=alice` and `count=3` both work).
pub fn parse_key_value(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Parse a workflow ID argument.
pub fn parse_workflow_id(raw: &str) -> Result<uuid::Uuid> {
    raw.parse()
        .with_context(|| format!("'{raw}' is not a valid workflow ID"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_value_parses_json_or_string() {
        assert_eq!(parse_key_value("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(
            parse_key_value("flag=true").unwrap(),
            ("flag".to_string(), json!(true))
        );
        assert_eq!(
            parse_key_value("name=alice").unwrap(),
            ("name".to_string(), json!("alice"))
        );
        assert_eq!(
            parse_key_value("url=http://x?a=b").unwrap(),
            ("url".to_string(), json!("http://x?a=b"))
        );
        assert_eq!(
            parse_key_value("obj={\"a\":1}").unwrap(),
            ("obj".to_string(), json!({"a": 1}))
        );
    }

    #[test]
    fn key_value_rejects_malformed() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn workflow_id_must_be_uuid() {
        assert!(parse_workflow_id("not-a-uuid").is_err());
        let id = uuid::Uuid::now_v7();
        assert_eq!(parse_workflow_id(&id.to_string()).unwrap(), id);
    }
}
