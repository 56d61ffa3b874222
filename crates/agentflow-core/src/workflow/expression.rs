//! JEXL expression evaluator for `expression` task conditions.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms and
//! provides boolean evaluation against a workflow/task pair.
//!
//! **Security note:** Expressions are interpreted by a side-effect-free
//! evaluator. Workflow data is always passed as context objects, NEVER
//! interpolated into expression strings.

use agentflow_types::task::Task;
use agentflow_types::workflow::Workflow;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Expressions see three bindings:
/// - `context` -- the workflow's shared context map
/// - `task` -- the task being gated
/// - `workflow` -- the whole workflow record
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            // Boolean transforms
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::value_to_bool(&val)))
            })
            // String search transforms
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Length transform (works on strings, arrays, and objects)
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean result.
    ///
    /// The `context` must be a JSON object. Expression results are coerced
    /// to boolean using JavaScript-like truthiness rules.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;

        Ok(Self::value_to_bool(&result))
    }

    /// Evaluate an expression with `context`, `task`, and `workflow` bound.
    pub fn evaluate_for_task(
        &self,
        expression: &str,
        workflow: &Workflow,
        task: &Task,
    ) -> Result<bool, ExpressionError> {
        let context = Self::task_context(workflow, task)?;
        self.evaluate_bool(expression, &context)
    }

    /// Build the JSON object expressions evaluate against.
    ///
    /// Shape:
    /// ```json
    /// { "context": { ... }, "task": { ... }, "workflow": { ... } }
    /// ```
    pub fn task_context(workflow: &Workflow, task: &Task) -> Result<Value, ExpressionError> {
        let task_value =
            serde_json::to_value(task).map_err(|e| ExpressionError::InvalidContext(e.to_string()))?;
        let workflow_value = serde_json::to_value(workflow)
            .map_err(|e| ExpressionError::InvalidContext(e.to_string()))?;

        Ok(json!({
            "context": workflow.context,
            "task": task_value,
            "workflow": workflow_value,
        }))
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    pub(crate) fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use agentflow_types::task::{TaskSpec, TaskStatus};
    use agentflow_types::workflow::WorkflowStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn evaluator() -> ExpressionEvaluator {
        ExpressionEvaluator::new()
    }

    fn workflow_with_context(context: Value) -> Workflow {
        let context: HashMap<String, Value> = serde_json::from_value(context).unwrap();
        Workflow {
            id: Uuid::now_v7(),
            name: "triage".to_string(),
            description: None,
            version: "1.0.0".to_string(),
            tasks: vec![Task::from_spec(
                TaskSpec::new("route", "Route", "router").parameter("priority", "high"),
            )],
            status: WorkflowStatus::Running,
            context,
            owner: Some("ops".to_string()),
            template_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_dot_notation_nested() {
        let ctx = json!({"user": {"profile": {"name": "Alice"}}});
        let result = evaluator()
            .evaluate_bool("user.profile.name == 'Alice'", &ctx)
            .unwrap();
        assert!(result);
    }

    #[test]
    fn test_boolean_connectives() {
        let ctx = json!({"a": 5, "b": "x"});
        let eval = evaluator();
        assert!(eval.evaluate_bool("a > 3 && b == 'x'", &ctx).unwrap());
        assert!(!eval.evaluate_bool("a > 10 && b == 'x'", &ctx).unwrap());
        assert!(eval.evaluate_bool("a > 10 || b == 'x'", &ctx).unwrap());
    }

    #[test]
    fn test_transform_lower() {
        let ctx = json!({"name": "RUST"});
        assert!(evaluator().evaluate_bool("name|lower == 'rust'", &ctx).unwrap());
    }

    #[test]
    fn test_transform_contains() {
        let ctx = json!({"title": "release notes v2"});
        let eval = evaluator();
        assert!(eval.evaluate_bool("title|contains('notes')", &ctx).unwrap());
        assert!(!eval.evaluate_bool("title|contains('draft')", &ctx).unwrap());
    }

    #[test]
    fn test_transform_length() {
        let ctx = json!({"items": [1, 2, 3]});
        assert!(evaluator().evaluate_bool("items|length > 2", &ctx).unwrap());
    }

    #[test]
    fn test_transform_not() {
        let ctx = json!({"flag": false});
        assert!(evaluator().evaluate_bool("flag|not", &ctx).unwrap());
    }

    #[test]
    fn test_truthiness_coercion() {
        let eval = evaluator();
        let ctx = json!({"s": "value", "empty": "", "n": 2, "zero": 0});
        assert!(eval.evaluate_bool("s", &ctx).unwrap());
        assert!(!eval.evaluate_bool("empty", &ctx).unwrap());
        assert!(eval.evaluate_bool("n", &ctx).unwrap());
        assert!(!eval.evaluate_bool("zero", &ctx).unwrap());
    }

    #[test]
    fn test_missing_property_is_falsy() {
        let ctx = json!({"a": {}});
        assert!(!evaluator().evaluate_bool("a.missing", &ctx).unwrap());
    }

    #[test]
    fn test_invalid_context_not_object() {
        let err = evaluator().evaluate_bool("true", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    #[test]
    fn test_syntax_error_is_eval_failed() {
        let err = evaluator().evaluate_bool("a ==", &json!({"a": 1})).unwrap_err();
        assert!(matches!(err, ExpressionError::EvalFailed(_)));
    }

    #[test]
    fn test_evaluate_for_task_binds_context_task_and_workflow() {
        let wf = workflow_with_context(json!({"count": 4, "mode": "fast"}));
        let task = &wf.tasks[0];
        let eval = evaluator();

        assert!(eval.evaluate_for_task("context.count > 3", &wf, task).unwrap());
        assert!(eval
            .evaluate_for_task("task.parameters.priority == 'high'", &wf, task)
            .unwrap());
        assert!(eval.evaluate_for_task("workflow.owner == 'ops'", &wf, task).unwrap());
        assert!(eval
            .evaluate_for_task("workflow.tasks[0].status == 'pending'", &wf, task)
            .unwrap());
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
