//! Executors available to every workflow run from the command line.
//!
//! | action  | parameters                  | result                         |
//! |---------|-----------------------------|--------------------------------|
//! | `noop`  | none                        | none                           |
//! | `echo`  | any                         | the task parameters            |
//! | `sleep` | `ms` (default 1000)         | `{"slept_ms": ms}`             |
//! | `fail`  | `message` (optional)        | error with the message         |

use std::collections::HashMap;
use std::time::Duration;

use agentflow_core::workflow::{ExecutorRegistry, TaskExecutor};
use agentflow_types::task::{Task, TaskOutcome};
use serde_json::{Map, Value, json};

pub const DEFAULT_SLEEP_MS: u64 = 1000;

/// Sleeps for `parameters.ms` milliseconds.
pub struct SleepExecutor;

impl TaskExecutor for SleepExecutor {
    async fn execute(
        &self,
        task: Task,
        _context: HashMap<String, Value>,
    ) -> anyhow::Result<TaskOutcome> {
        let ms = task
            .parameters
            .get("ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_SLEEP_MS);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(TaskOutcome::success(json!({ "slept_ms": ms })))
    }
}

/// Registry preloaded with `noop`, `echo`, `sleep` and `fail`.
pub fn builtin_registry() -> ExecutorRegistry {
    let registry = ExecutorRegistry::new();

    registry.register_fn("noop", |_task, _ctx| async { Ok(TaskOutcome::empty()) });

    registry.register_fn("echo", |task: Task, _ctx| async move {
        let params: Map<String, Value> = task.parameters.into_iter().collect();
        Ok(TaskOutcome::success(Value::Object(params)))
    });

    registry.register("sleep", SleepExecutor);

    registry.register_fn("fail", |task: Task, _ctx| async move {
        let message = task
            .parameters
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("task failed")
            .to_string();
        Err(anyhow::anyhow!(message))
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::task::TaskSpec;

    fn task(action: &str) -> TaskSpec {
        TaskSpec::new("t", "T", action)
    }

    async fn run(spec: TaskSpec) -> anyhow::Result<TaskOutcome> {
        let registry = builtin_registry();
        let executor = registry.get(&spec.action).unwrap();
        executor.execute(Task::from_spec(spec), HashMap::new()).await
    }

    #[test]
    fn registers_all_builtins() {
        assert_eq!(
            builtin_registry().actions(),
            vec!["echo", "fail", "noop", "sleep"]
        );
    }

    #[tokio::test]
    async fn echo_returns_parameters() {
        let outcome = run(task("echo").parameter("greeting", "hi")).await.unwrap();
        assert_eq!(outcome.result, Some(json!({ "greeting": "hi" })));
    }

    #[tokio::test]
    async fn sleep_reports_duration() {
        let outcome = run(task("sleep").parameter("ms", 5)).await.unwrap();
        assert_eq!(outcome.result, Some(json!({ "slept_ms": 5 })));
    }

    #[tokio::test]
    async fn fail_uses_message_parameter() {
        let err = run(task("fail").parameter("message", "boom")).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let err = run(task("fail")).await.unwrap_err();
        assert_eq!(err.to_string(), "task failed");
    }
}
