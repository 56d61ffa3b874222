//! Workflow instance types.
//!
//! A `Workflow` is a runnable DAG of tasks with its own status and shared
//! context. `WorkflowSpec` and `WorkflowOptions` are the inputs to the
//! factory; `EngineSnapshot` is the persisted shape of the whole registry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::{Task, TaskSpec, TaskStatus};

/// Version assigned when a spec or template does not name one.
pub const DEFAULT_VERSION: &str = "1.0.0";

pub fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Paused => write!(f, "paused"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "paused" => Ok(WorkflowStatus::Paused),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow instance.
///
/// `tasks` only ever grows: retries append clones rather than reusing IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned at creation.
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub tasks: Vec<Task>,
    pub status: WorkflowStatus,
    /// Shared scratch space visible to conditions and executors.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Template this workflow was instantiated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Workflow {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// True when every task has reached a terminal status (vacuously true when empty).
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(Task::is_terminal)
    }

    pub fn any_task_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    /// Number of tasks currently in `status`.
    pub fn count_tasks(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Factory inputs
// ---------------------------------------------------------------------------

/// Caller-supplied description of a workflow to create directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Per-creation options; caller values win over spec/template values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Start the workflow immediately after creation.
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowOptions {
    pub fn auto_start() -> Self {
        Self {
            auto_start: true,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Persisted snapshot
// ---------------------------------------------------------------------------

/// Everything the engine persists under its state key.
///
/// Serialized as `{"workflows": [[id, workflow], ...], "activeWorkflows": [id, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    #[serde(default)]
    pub workflows: Vec<(Uuid, Workflow)>,
    #[serde(default)]
    pub active_workflows: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            name: "daily-digest".to_string(),
            description: None,
            version: default_version(),
            tasks: vec![
                Task::from_spec(TaskSpec::new("a", "Fetch", "http.get")),
                Task::from_spec(TaskSpec::new("b", "Summarize", "llm.summarize").depends_on("a")),
            ],
            status: WorkflowStatus::Pending,
            context: HashMap::new(),
            owner: None,
            template_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn workflow_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[test]
    fn task_lookup_and_aggregates() {
        let mut wf = sample_workflow();
        assert!(wf.task("a").is_some());
        assert!(wf.task("missing").is_none());
        assert!(!wf.all_tasks_terminal());

        for task in &mut wf.tasks {
            task.status = TaskStatus::Completed;
        }
        wf.task_mut("b").unwrap().status = TaskStatus::Failed;
        assert!(wf.all_tasks_terminal());
        assert!(wf.any_task_failed());
        assert_eq!(wf.count_tasks(TaskStatus::Completed), 1);
    }

    #[test]
    fn empty_workflow_is_vacuously_terminal() {
        let mut wf = sample_workflow();
        wf.tasks.clear();
        assert!(wf.all_tasks_terminal());
    }

    #[test]
    fn snapshot_uses_pair_list_shape() {
        let wf = sample_workflow();
        let snapshot = EngineSnapshot {
            workflows: vec![(wf.id, wf.clone())],
            active_workflows: vec![wf.id],
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["activeWorkflows"], json!([wf.id.to_string()]));
        assert_eq!(value["workflows"][0][0], json!(wf.id.to_string()));
        assert_eq!(value["workflows"][0][1]["name"], json!("daily-digest"));

        let back: EngineSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn spec_defaults_version() {
        let spec: WorkflowSpec = serde_json::from_value(json!({"name": "adhoc"})).unwrap();
        assert_eq!(spec.version, DEFAULT_VERSION);
        assert!(spec.tasks.is_empty());
    }
}
