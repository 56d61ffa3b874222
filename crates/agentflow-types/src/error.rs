use thiserror::Error;
use uuid::Uuid;

use crate::workflow::WorkflowStatus;

/// Errors from state store operations (used by trait definitions in agentflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors surfaced by public engine operations.
///
/// Per-task failures never appear here; they are recorded on the task itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("task '{task_id}' not found in workflow {workflow_id}")]
    TaskNotFound { workflow_id: Uuid, task_id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("cannot {action} workflow {workflow_id}: status is {status}")]
    InvalidTransition {
        workflow_id: Uuid,
        status: WorkflowStatus,
        action: &'static str,
    },

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

impl EngineError {
    /// Whether this error means the addressed entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::WorkflowNotFound(_)
                | EngineError::TemplateNotFound(_)
                | EngineError::TaskNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::TemplateNotFound("research".to_string());
        assert_eq!(err.to_string(), "template not found: research");

        let id = Uuid::nil();
        let err = EngineError::InvalidTransition {
            workflow_id: id,
            status: WorkflowStatus::Completed,
            action: "start",
        };
        assert!(err.to_string().contains("cannot start"));
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(EngineError::WorkflowNotFound(Uuid::nil()).is_not_found());
        assert!(!EngineError::Validation("dup".to_string()).is_not_found());
        let storage: EngineError = RepositoryError::Connection.into();
        assert!(!storage.is_not_found());
    }
}
