//! Application state wiring the engine to the configured infrastructure.

use std::path::PathBuf;

use agentflow_core::workflow::WorkflowEngine;
use agentflow_infra::config::{load_engine_config, resolve_data_dir};
use agentflow_infra::storage::{ConfiguredStateStore, open_state_store};

use crate::executors::builtin_registry;

/// Engine pinned to the store chosen by `config.toml`.
pub type Engine = WorkflowEngine<ConfiguredStateStore>;

pub struct AppState {
    pub engine: Engine,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config, open storage and the engine.
    pub async fn init() -> anyhow::Result<Self> {
        Self::open(resolve_data_dir()).await
    }

    /// Open the engine over `data_dir`.
    ///
    /// Persisted running workflows are neither resumed nor requeued: another
    /// process may still be driving them, and each CLI invocation is
    /// short-lived. Only `workflow resume` takes them over.
    pub async fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut config = load_engine_config(&data_dir).await;
        config.resume_on_open = false;
        config.requeue_interrupted_tasks = false;

        let store = open_state_store(&config.storage, &data_dir).await?;
        let engine = WorkflowEngine::open_with_executors(config, store, builtin_registry()).await?;

        Ok(Self { engine, data_dir })
    }

    /// Stop drivers and, for commands that changed state, write the final
    /// snapshot. Read-only commands leave the stored snapshot as they found it.
    pub async fn close(&self, persist: bool) {
        if persist {
            self.engine.shutdown().await;
        } else {
            self.engine.scheduler().shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use agentflow_core::workflow::{ExecutorRegistry, WorkflowBuilder};
    use agentflow_types::event::WorkflowEvent;
    use agentflow_types::task::{TaskOutcome, TaskSpec, TaskStatus};
    use agentflow_types::workflow::{WorkflowOptions, WorkflowStatus};
    use tokio::sync::Notify;

    use super::*;
    use crate::cli::Output;
    use crate::cli::workflow::{WorkflowCommand, handle_workflow_command};

    /// Engine over `data_dir` whose `noop` blocks until `gate` fires.
    async fn driving_engine(data_dir: &Path, gate: Arc<Notify>) -> Engine {
        let config = load_engine_config(data_dir).await;
        let store = open_state_store(&config.storage, data_dir).await.unwrap();
        let executors = ExecutorRegistry::new();
        executors.register_fn("noop", move |_, _| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(TaskOutcome::empty())
            }
        });
        WorkflowEngine::open_with_executors(config, store, executors)
            .await
            .unwrap()
    }

    /// Start a two-task workflow on `engine` and wait until `a` is running.
    async fn start_held(engine: &Engine) -> uuid::Uuid {
        let mut rx = engine.subscribe();
        let spec = WorkflowBuilder::new("held")
            .task(TaskSpec::new("a", "A", "noop"))
            .task(TaskSpec::new("b", "B", "noop").depends_on("a"))
            .build()
            .unwrap();
        let wf = engine
            .create_workflow(spec, WorkflowOptions::auto_start())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let WorkflowEvent::TaskStarted { task_id, .. } = rx.recv().await.unwrap() {
                    if task_id == "a" {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        wf.id
    }

    #[tokio::test]
    async fn read_only_open_leaves_running_tasks_alone() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let driver = driving_engine(dir.path(), Arc::clone(&gate)).await;
        let id = start_held(&driver).await;

        let viewer = AppState::open(dir.path().to_path_buf()).await.unwrap();
        let task = viewer.engine.get_task(&id, "a").unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.start_time.is_some());
        viewer.close(false).await;

        let again = AppState::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(again.engine.get_task(&id, "a").unwrap().status, TaskStatus::Running);
        assert!(!again.engine.scheduler().is_driving(&id));

        gate.notify_waiters();
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn resume_requeues_tasks_from_a_dead_process() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driving_engine(dir.path(), Arc::new(Notify::new())).await;
        let id = start_held(&driver).await;
        driver.shutdown().await;

        let state = AppState::open(dir.path().to_path_buf()).await.unwrap();
        let out = Output {
            json: false,
            quiet: true,
        };
        handle_workflow_command(
            WorkflowCommand::Resume {
                id: id.to_string(),
                timeout: 5,
            },
            &state,
            out,
        )
        .await
        .unwrap();

        let wf = state.engine.get_workflow(&id).unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.tasks.iter().all(|t| t.status == TaskStatus::Completed));
        state.close(true).await;
    }
}
