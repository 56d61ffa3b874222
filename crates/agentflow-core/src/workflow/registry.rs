//! Executor registry: action name -> task executor.
//!
//! `TaskExecutor` uses RPITIT and so is not object-safe. Following the
//! same blanket-impl pattern as the other boxed traits in this crate:
//! 1. Define an object-safe `TaskExecutorDyn` trait with boxed futures
//! 2. Blanket-impl `TaskExecutorDyn` for all `T: TaskExecutor`
//! 3. `BoxTaskExecutor` wraps `Box<dyn TaskExecutorDyn>` and delegates

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use agentflow_types::task::{Task, TaskOutcome};
use dashmap::DashMap;
use serde_json::Value;

// ---------------------------------------------------------------------------
// TaskExecutor trait
// ---------------------------------------------------------------------------

/// Performs the work for one action name.
///
/// The executor receives an owned snapshot of the task (with
/// `dependency_results` populated) and of the workflow context. Returning
/// `Err` marks the task failed with the error's text; returning an outcome
/// with `success: false` does the same with the outcome's error message.
pub trait TaskExecutor: Send + Sync {
    fn execute(
        &self,
        task: Task,
        context: HashMap<String, Value>,
    ) -> impl Future<Output = anyhow::Result<TaskOutcome>> + Send;
}

/// Object-safe version of [`TaskExecutor`] with boxed futures.
pub trait TaskExecutorDyn: Send + Sync {
    fn execute_boxed(
        &self,
        task: Task,
        context: HashMap<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TaskOutcome>> + Send + '_>>;
}

impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn execute_boxed(
        &self,
        task: Task,
        context: HashMap<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TaskOutcome>> + Send + '_>> {
        Box::pin(self.execute(task, context))
    }
}

/// Type-erased task executor.
pub struct BoxTaskExecutor {
    inner: Box<dyn TaskExecutorDyn + Send + Sync>,
}

impl BoxTaskExecutor {
    pub fn new<T: TaskExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(
        &self,
        task: Task,
        context: HashMap<String, Value>,
    ) -> anyhow::Result<TaskOutcome> {
        self.inner.execute_boxed(task, context).await
    }
}

impl std::fmt::Debug for BoxTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskExecutor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Closure executors
// ---------------------------------------------------------------------------

/// Adapts an async closure into a [`TaskExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(Task, HashMap<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<TaskOutcome>> + Send,
{
    fn execute(
        &self,
        task: Task,
        context: HashMap<String, Value>,
    ) -> impl Future<Output = anyhow::Result<TaskOutcome>> + Send {
        (self.f)(task, context)
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

/// Concurrent map from action name to executor.
///
/// Registering an action that already exists replaces the previous executor.
/// Lookups hand out `Arc`s so a dispatched task keeps its executor alive even
/// if it is unregistered mid-run.
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<BoxTaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TaskExecutor + 'static>(&self, action: impl Into<String>, executor: T) {
        let action = action.into();
        tracing::debug!(action = action.as_str(), "registering task executor");
        if self
            .executors
            .insert(action.clone(), Arc::new(BoxTaskExecutor::new(executor)))
            .is_some()
        {
            tracing::debug!(action = action.as_str(), "replaced existing executor");
        }
    }

    /// Register an async closure as the executor for `action`.
    pub fn register_fn<F, Fut>(&self, action: impl Into<String>, f: F)
    where
        F: Fn(Task, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TaskOutcome>> + Send + 'static,
    {
        self.register(action, FnExecutor::new(f));
    }

    /// Returns true if an executor was removed.
    pub fn unregister(&self, action: &str) -> bool {
        self.executors.remove(action).is_some()
    }

    pub fn get(&self, action: &str) -> Option<Arc<BoxTaskExecutor>> {
        self.executors.get(action).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, action: &str) -> bool {
        self.executors.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        actions.sort();
        actions
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::task::TaskSpec;
    use serde_json::json;

    struct Doubler;

    impl TaskExecutor for Doubler {
        async fn execute(
            &self,
            task: Task,
            _context: HashMap<String, Value>,
        ) -> anyhow::Result<TaskOutcome> {
            let n = task
                .parameters
                .get("n")
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow::anyhow!("missing parameter n"))?;
            Ok(TaskOutcome::success(json!(n * 2)))
        }
    }

    fn task(n: i64) -> Task {
        Task::from_spec(TaskSpec::new("t", "T", "double").parameter("n", n))
    }

    #[tokio::test]
    async fn registered_executor_runs() {
        let registry = ExecutorRegistry::new();
        registry.register("double", Doubler);

        let executor = registry.get("double").unwrap();
        let outcome = executor.execute(task(21), HashMap::new()).await.unwrap();
        assert_eq!(outcome.result, Some(json!(42)));
    }

    #[tokio::test]
    async fn executor_errors_propagate() {
        let registry = ExecutorRegistry::new();
        registry.register("double", Doubler);

        let bare = Task::from_spec(TaskSpec::new("t", "T", "double"));
        let err = registry
            .get("double")
            .unwrap()
            .execute(bare, HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing parameter n"));
    }

    #[tokio::test]
    async fn closures_can_be_registered() {
        let registry = ExecutorRegistry::new();
        registry.register_fn("greet", |_task, context| async move {
            let name = context.get("name").cloned().unwrap_or(json!("world"));
            Ok(TaskOutcome::success(json!(format!("hello {}", name.as_str().unwrap_or("?")))))
        });

        let context = HashMap::from([("name".to_string(), json!("ada"))]);
        let outcome = registry
            .get("greet")
            .unwrap()
            .execute(task(0), context)
            .await
            .unwrap();
        assert_eq!(outcome.result, Some(json!("hello ada")));
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let registry = ExecutorRegistry::new();
        registry.register("double", Doubler);
        registry.register("double", Doubler);
        registry.register_fn("noop", |_, _| async { Ok(TaskOutcome::empty()) });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.actions(), vec!["double", "noop"]);
        assert!(registry.unregister("double"));
        assert!(!registry.unregister("double"));
        assert!(!registry.contains("double"));
        assert!(registry.get("double").is_none());
    }
}
