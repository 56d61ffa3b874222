//! Event types broadcast by the workflow engine.
//!
//! `WorkflowEvent` is the unified event type published on the event bus.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notifications emitted by the engine. Fire-and-forget; no acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowCreated { workflow_id: Uuid },
    WorkflowStarted { workflow_id: Uuid },
    WorkflowPaused { workflow_id: Uuid },
    WorkflowResumed { workflow_id: Uuid },
    WorkflowCancelled { workflow_id: Uuid },

    /// Every task reached a terminal status. `success` is false if any task failed.
    WorkflowCompleted { workflow_id: Uuid, success: bool },

    TaskStarted { workflow_id: Uuid, task_id: String },

    /// The executor returned an outcome, successful or not.
    TaskCompleted {
        workflow_id: Uuid,
        task_id: String,
        success: bool,
    },

    /// The executor errored, timed out, panicked, or was not registered.
    TaskFailed {
        workflow_id: Uuid,
        task_id: String,
        error: String,
    },

    TaskSkipped { workflow_id: Uuid, task_id: String },

    TemplateCreated { template_id: Uuid },
    TemplateUpdated { template_id: Uuid },
    TemplateDeleted { template_id: Uuid },

    /// A version bump produced a new template record.
    TemplateVersioned {
        original_template_id: Uuid,
        new_template_id: Uuid,
    },
}

impl WorkflowEvent {
    /// Canonical colon-separated event name (e.g. `workflow:task:started`).
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowCreated { .. } => "workflow:created",
            WorkflowEvent::WorkflowStarted { .. } => "workflow:started",
            WorkflowEvent::WorkflowPaused { .. } => "workflow:paused",
            WorkflowEvent::WorkflowResumed { .. } => "workflow:resumed",
            WorkflowEvent::WorkflowCancelled { .. } => "workflow:cancelled",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow:completed",
            WorkflowEvent::TaskStarted { .. } => "workflow:task:started",
            WorkflowEvent::TaskCompleted { .. } => "workflow:task:completed",
            WorkflowEvent::TaskFailed { .. } => "workflow:task:failed",
            WorkflowEvent::TaskSkipped { .. } => "workflow:task:skipped",
            WorkflowEvent::TemplateCreated { .. } => "workflow:template:created",
            WorkflowEvent::TemplateUpdated { .. } => "workflow:template:updated",
            WorkflowEvent::TemplateDeleted { .. } => "workflow:template:deleted",
            WorkflowEvent::TemplateVersioned { .. } => "workflow:template:versioned",
        }
    }

    /// The workflow this event concerns, if it is a workflow or task event.
    pub fn workflow_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::WorkflowCreated { workflow_id }
            | WorkflowEvent::WorkflowStarted { workflow_id }
            | WorkflowEvent::WorkflowPaused { workflow_id }
            | WorkflowEvent::WorkflowResumed { workflow_id }
            | WorkflowEvent::WorkflowCancelled { workflow_id }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::TaskStarted { workflow_id, .. }
            | WorkflowEvent::TaskCompleted { workflow_id, .. }
            | WorkflowEvent::TaskFailed { workflow_id, .. }
            | WorkflowEvent::TaskSkipped { workflow_id, .. } => Some(*workflow_id),
            _ => None,
        }
    }
}
