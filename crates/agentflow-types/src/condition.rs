//! Gating conditions attached to tasks.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A predicate that decides whether a task may run.
///
/// Internally tagged by `type`:
/// ```json
/// { "type": "task_success", "task_id": "fetch" }
/// { "type": "expression", "expression": "context.count > 3" }
/// { "type": "state_condition", "state_path": "user.tier", "value": "pro" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Referenced task finished with `Completed`.
    TaskSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// Referenced task finished with `Failed`.
    TaskFailure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// Referenced task finished with `Completed` or `Failed`.
    TaskCompletion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// JEXL expression evaluated against `context`, `task` and `workflow`.
    Expression {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },
    /// Dot-separated lookup into the workflow context.
    ///
    /// An absent `value` checks for a present, non-null entry; an explicit
    /// `"value": null` requires the entry to be null.
    StateCondition {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state_path: Option<String>,
        #[serde(
            default,
            deserialize_with = "explicit_value",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
    },
    Always,
}

/// Keep a present `null` as `Some(Value::Null)`; only a missing field is `None`.
fn explicit_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Condition {
    pub fn task_success(task_id: impl Into<String>) -> Self {
        Condition::TaskSuccess {
            task_id: Some(task_id.into()),
        }
    }

    pub fn task_failure(task_id: impl Into<String>) -> Self {
        Condition::TaskFailure {
            task_id: Some(task_id.into()),
        }
    }

    pub fn task_completion(task_id: impl Into<String>) -> Self {
        Condition::TaskCompletion {
            task_id: Some(task_id.into()),
        }
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Condition::Expression {
            expression: Some(expression.into()),
        }
    }

    /// Holds when the context value at `state_path` equals `value`.
    pub fn state_equals(state_path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::StateCondition {
            state_path: Some(state_path.into()),
            value: Some(value.into()),
        }
    }

    /// Holds when the context value at `state_path` is present and non-null.
    pub fn state_present(state_path: impl Into<String>) -> Self {
        Condition::StateCondition {
            state_path: Some(state_path.into()),
            value: None,
        }
    }

    /// The task this condition refers to, for the `Task*` variants.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Condition::TaskSuccess { task_id }
            | Condition::TaskFailure { task_id }
            | Condition::TaskCompletion { task_id } => task_id.as_deref(),
            _ => None,
        }
    }

    /// Rewrite the referenced task ID through `ids`.
    ///
    /// References with no entry in `ids` are left untouched.
    pub fn remap_task_id(&mut self, ids: &HashMap<String, String>) {
        if let Condition::TaskSuccess { task_id }
        | Condition::TaskFailure { task_id }
        | Condition::TaskCompletion { task_id } = self
        {
            if let Some(new_id) = task_id.as_ref().and_then(|old| ids.get(old)) {
                *task_id = Some(new_id.clone());
            }
        }
    }
}
