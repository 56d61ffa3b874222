//! Condition evaluation for task gating.
//!
//! `ConditionEvaluator::evaluate` is pure: it reads workflow and task state
//! and never mutates it. Expression errors fail closed (the condition is
//! treated as unmet) and are logged rather than propagated.

use std::collections::HashMap;

use agentflow_types::condition::Condition;
use agentflow_types::task::{Task, TaskStatus};
use agentflow_types::workflow::Workflow;
use serde_json::Value;

use super::expression::ExpressionEvaluator;

/// Evaluates [`Condition`]s against workflow state.
#[derive(Default)]
pub struct ConditionEvaluator {
    expressions: ExpressionEvaluator,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            expressions: ExpressionEvaluator::new(),
        }
    }

    /// Decide whether a single condition holds for `task` within `workflow`.
    pub fn evaluate(&self, condition: &Condition, workflow: &Workflow, task: &Task) -> bool {
        match condition {
            Condition::Always => true,
            Condition::TaskSuccess { task_id } => {
                referenced_status(workflow, task_id.as_deref(), |s| s == TaskStatus::Completed)
            }
            Condition::TaskFailure { task_id } => {
                referenced_status(workflow, task_id.as_deref(), |s| s == TaskStatus::Failed)
            }
            Condition::TaskCompletion { task_id } => {
                referenced_status(workflow, task_id.as_deref(), |s| {
                    matches!(s, TaskStatus::Completed | TaskStatus::Failed)
                })
            }
            Condition::Expression { expression } => {
                let Some(expression) = expression.as_deref() else {
                    return true;
                };
                match self.expressions.evaluate_for_task(expression, workflow, task) {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(
                            workflow_id = %workflow.id,
                            task_id = task.id.as_str(),
                            expression,
                            error = %e,
                            "condition expression failed, treating as unmet"
                        );
                        false
                    }
                }
            }
            Condition::StateCondition { state_path, value } => {
                let Some(path) = state_path.as_deref() else {
                    return true;
                };
                let resolved = resolve_state_path(&workflow.context, path);
                match value {
                    None => resolved.is_some_and(|v| !v.is_null()),
                    Some(expected) => resolved.is_some_and(|actual| values_equal(actual, expected)),
                }
            }
        }
    }

    /// The first condition on `task` that does not hold, if any.
    ///
    /// Evaluation stops at the first unmet condition.
    pub fn first_unmet<'t>(&self, workflow: &Workflow, task: &'t Task) -> Option<&'t Condition> {
        task.conditions
            .iter()
            .find(|condition| !self.evaluate(condition, workflow, task))
    }
}

/// A missing `task_id` is a no-op gate; a reference to an unknown task never holds.
fn referenced_status(
    workflow: &Workflow,
    task_id: Option<&str>,
    predicate: impl Fn(TaskStatus) -> bool,
) -> bool {
    match task_id {
        None => true,
        Some(id) => workflow.task(id).is_some_and(|t| predicate(t.status)),
    }
}

/// Resolve a dot-separated path against the workflow context.
///
/// Array segments may be addressed by index (`items.0.name`).
pub fn resolve_state_path<'a>(context: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Structural equality, with numbers compared by value (`1 == 1.0`).
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::task::TaskSpec;
    use agentflow_types::workflow::WorkflowStatus;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn workflow() -> Workflow {
        let mut done = Task::from_spec(TaskSpec::new("done", "Done", "noop"));
        done.status = TaskStatus::Completed;
        let mut broken = Task::from_spec(TaskSpec::new("broken", "Broken", "noop"));
        broken.status = TaskStatus::Failed;
        let waiting = Task::from_spec(TaskSpec::new("waiting", "Waiting", "noop"));
        let subject = Task::from_spec(TaskSpec::new("subject", "Subject", "noop"));

        Workflow {
            id: Uuid::now_v7(),
            name: "conditions".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            tasks: vec![done, broken, waiting, subject],
            status: WorkflowStatus::Running,
            context: HashMap::from([
                ("user".to_string(), json!({"tier": "pro", "seats": 5, "manager": null})),
                ("items".to_string(), json!([{"name": "first"}])),
                ("ready".to_string(), json!(true)),
            ]),
            owner: None,
            template_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    fn check(condition: Condition) -> bool {
        let wf = workflow();
        let subject = wf.task("subject").unwrap().clone();
        ConditionEvaluator::new().evaluate(&condition, &wf, &subject)
    }

    #[test]
    fn always_holds() {
        assert!(check(Condition::Always));
    }

    #[test]
    fn task_status_conditions() {
        assert!(check(Condition::task_success("done")));
        assert!(!check(Condition::task_success("broken")));
        assert!(check(Condition::task_failure("broken")));
        assert!(!check(Condition::task_failure("done")));
        assert!(check(Condition::task_completion("done")));
        assert!(check(Condition::task_completion("broken")));
        assert!(!check(Condition::task_completion("waiting")));
    }

    #[test]
    fn missing_task_id_defaults_to_true() {
        assert!(check(Condition::TaskSuccess { task_id: None }));
        assert!(check(Condition::TaskFailure { task_id: None }));
        assert!(check(Condition::TaskCompletion { task_id: None }));
    }

    #[test]
    fn unknown_referenced_task_is_false() {
        assert!(!check(Condition::task_success("ghost")));
        assert!(!check(Condition::task_completion("ghost")));
    }

    #[test]
    fn expression_conditions() {
        assert!(check(Condition::expression("context.user.tier == 'pro'")));
        assert!(!check(Condition::expression("context.user.seats > 10")));
        assert!(check(Condition::Expression { expression: None }));
    }

    #[test]
    fn malformed_expression_fails_closed() {
        assert!(!check(Condition::expression("context.user.tier ==")));
    }

    #[test]
    fn state_condition_presence() {
        assert!(check(Condition::state_present("user.tier")));
        assert!(!check(Condition::state_present("user.manager")));
        assert!(!check(Condition::state_present("user.missing")));
        assert!(!check(Condition::state_present("nothing.here.at.all")));
        assert!(check(Condition::StateCondition {
            state_path: None,
            value: None
        }));
    }

    #[test]
    fn state_condition_equality() {
        assert!(check(Condition::state_equals("user.tier", "pro")));
        assert!(!check(Condition::state_equals("user.tier", "free")));
        assert!(check(Condition::state_equals("user.seats", 5.0)));
        assert!(check(Condition::state_equals("ready", true)));
        assert!(check(Condition::state_equals("items.0.name", "first")));
    }

    #[test]
    fn state_condition_equal_to_null() {
        assert!(check(Condition::state_equals("user.manager", Value::Null)));
        assert!(!check(Condition::state_equals("user.tier", Value::Null)));
        assert!(!check(Condition::state_equals("user.missing", Value::Null)));
    }

    #[test]
    fn first_unmet_stops_at_first_false() {
        let mut wf = workflow();
        let subject = wf.task_mut("subject").unwrap();
        subject.conditions = vec![
            Condition::Always,
            Condition::task_success("broken"),
            Condition::expression("this is not valid ==="),
        ];
        let subject = wf.task("subject").unwrap().clone();

        let unmet = ConditionEvaluator::new().first_unmet(&wf, &subject);
        assert_eq!(unmet, Some(&Condition::task_success("broken")));
    }
}
