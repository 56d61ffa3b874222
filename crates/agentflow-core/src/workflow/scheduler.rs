//! Per-workflow drivers: readiness, dispatch, settlement, finalization.
//!
//! Each running workflow gets exactly one driver, a tokio task that loops:
//!
//! 1. Plan a pass under the workflow's map entry: skip doomed or gated
//!    tasks, mark ready tasks Running, finalize when everything is terminal.
//! 2. Persist, publish events, and spawn the dispatched executions into a
//!    `JoinSet`.
//! 3. Wait for the next settlement (or a wake-up) and record it.
//!
//! The driver exits once nothing is in flight and no further pass can make
//! progress. Wake-ups bump an epoch counter so a driver that is about to exit
//! never swallows a concurrent `ensure_driver` call.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agentflow_types::event::WorkflowEvent;
use agentflow_types::task::{
    DEFAULT_FAILURE_MESSAGE, DependencyResult, Task, TaskOutcome, TaskStatus,
};
use agentflow_types::workflow::{Workflow, WorkflowStatus};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::event::EventBus;
use crate::storage::StateStore;

use super::condition::ConditionEvaluator;
use super::registry::{BoxTaskExecutor, ExecutorRegistry};
use super::repository::WorkflowRepository;

// ---------------------------------------------------------------------------
// Task failures
// ---------------------------------------------------------------------------

/// Why a dispatched task did not complete successfully.
///
/// Never propagated to callers; the message is recorded on the task.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskFailure {
    #[error("no executor registered for action: {action}")]
    MissingExecutor { action: String },

    #[error("task timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The executor returned an error or panicked.
    #[error("{0}")]
    Execution(String),

    /// The executor returned an outcome with `success: false`.
    #[error("{0}")]
    Rejected(String),
}

impl TaskFailure {
    /// Whether a retry clone may be appended for this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskFailure::MissingExecutor { .. })
    }
}

/// The result of one executor run, routed back to the driver.
#[derive(Debug)]
pub(crate) struct Settlement {
    pub task_id: String,
    pub result: Result<Option<Value>, TaskFailure>,
    /// Context entries written by the executor; applied only on success.
    pub context_updates: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Planning (synchronous, runs under the workflow's map entry)
// ---------------------------------------------------------------------------

/// Task ready for execution, with the inputs it runs against.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub task: Task,
    pub context: HashMap<String, Value>,
}

/// What a single scheduling pass changed.
#[derive(Debug, Default)]
pub(crate) struct Pass {
    pub skipped: Vec<String>,
    pub dispatched: Vec<Dispatch>,
    /// `Some(success)` when this pass moved the workflow to a terminal status.
    pub finalized: Option<bool>,
    /// The workflow is Running and still has non-terminal tasks.
    pub waiting: bool,
}

enum Readiness {
    Ready,
    Wait,
    Skip,
}

fn readiness(workflow: &Workflow, task: &Task, conditions: &ConditionEvaluator) -> Readiness {
    // A dependency that ended in anything other than Completed can never be satisfied
    let doomed = task.dependencies.iter().any(|dep| {
        workflow
            .task(dep)
            .is_some_and(|d| d.is_terminal() && d.status != TaskStatus::Completed)
    });
    if doomed {
        return Readiness::Skip;
    }

    for dep in &task.dependencies {
        match workflow.task(dep) {
            Some(d) if d.status == TaskStatus::Completed => {}
            Some(_) => return Readiness::Wait,
            None => {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    task_id = task.id.as_str(),
                    dependency = dep.as_str(),
                    "dependency not found in workflow; task is blocked"
                );
                return Readiness::Wait;
            }
        }
    }

    match conditions.first_unmet(workflow, task) {
        Some(condition) => {
            tracing::debug!(
                workflow_id = %workflow.id,
                task_id = task.id.as_str(),
                ?condition,
                "condition not met, skipping task"
            );
            Readiness::Skip
        }
        None => Readiness::Ready,
    }
}

/// Run one scheduling pass over `workflow`.
///
/// Does nothing unless the workflow is Running. Skips cascade within the
/// pass; ready tasks are marked Running with their dependency results
/// populated.
pub(crate) fn plan_pass(workflow: &mut Workflow, conditions: &ConditionEvaluator) -> Pass {
    let mut pass = Pass::default();
    if workflow.status != WorkflowStatus::Running {
        return pass;
    }

    let mut ready: Vec<usize> = Vec::new();
    loop {
        let mut changed = false;
        for idx in 0..workflow.tasks.len() {
            if workflow.tasks[idx].status != TaskStatus::Pending || ready.contains(&idx) {
                continue;
            }
            match readiness(workflow, &workflow.tasks[idx], conditions) {
                Readiness::Ready => ready.push(idx),
                Readiness::Wait => {}
                Readiness::Skip => {
                    let task = &mut workflow.tasks[idx];
                    task.status = TaskStatus::Skipped;
                    pass.skipped.push(task.id.clone());
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let now = Utc::now();
    for idx in ready {
        let dependency_results: HashMap<String, DependencyResult> = workflow.tasks[idx]
            .dependencies
            .iter()
            .filter_map(|dep| workflow.task(dep))
            .map(|dep| {
                (
                    dep.name.clone(),
                    DependencyResult {
                        task_id: dep.id.clone(),
                        result: dep.result.clone(),
                    },
                )
            })
            .collect();

        let task = &mut workflow.tasks[idx];
        task.status = TaskStatus::Running;
        task.start_time = Some(now);
        task.dependency_results = dependency_results;

        pass.dispatched.push(Dispatch {
            task: task.clone(),
            context: workflow.context.clone(),
        });
    }

    if pass.dispatched.is_empty() && workflow.all_tasks_terminal() {
        let success = !workflow.any_task_failed();
        workflow.status = if success {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        workflow.completed_at = Some(now);
        pass.finalized = Some(success);
    } else {
        pass.waiting = true;
    }

    pass
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Build the clone appended when a failed task still has retries left.
pub(crate) fn retry_clone(task: &Task) -> Task {
    let retry_count = task
        .metadata
        .get("retryCount")
        .and_then(Value::as_u64)
        .unwrap_or(0)
        + 1;

    let mut metadata = task.metadata.clone();
    metadata.insert("retryCount".to_string(), json!(retry_count));
    metadata.insert("originalTaskId".to_string(), json!(task.id));

    Task {
        id: Uuid::now_v7().to_string(),
        name: format!("{} (Retry)", task.name),
        description: task.description.clone(),
        action: task.action.clone(),
        parameters: task.parameters.clone(),
        dependencies: task.dependencies.clone(),
        conditions: task.conditions.clone(),
        timeout_ms: task.timeout_ms,
        retries: Some(task.retries.unwrap_or(0).saturating_sub(1)),
        status: TaskStatus::Pending,
        start_time: None,
        end_time: None,
        result: None,
        error: None,
        dependency_results: HashMap::new(),
        metadata,
    }
}

/// Record a settlement on the workflow.
///
/// Returns the event to publish, or `None` when the settlement was discarded
/// because the task is no longer Running (for example after a cancel).
pub(crate) fn apply_settlement(workflow: &mut Workflow, settlement: Settlement) -> Option<WorkflowEvent> {
    let workflow_id = workflow.id;
    let idx = workflow
        .tasks
        .iter()
        .position(|t| t.id == settlement.task_id)?;
    if workflow.tasks[idx].status != TaskStatus::Running {
        return None;
    }

    let task = &mut workflow.tasks[idx];
    task.end_time = Some(Utc::now());

    match settlement.result {
        Ok(result) => {
            task.status = TaskStatus::Completed;
            workflow.context.extend(settlement.context_updates);
            if let Some(value) = &result {
                workflow
                    .context
                    .insert(format!("task_{}_result", task.id), value.clone());
            }
            task.result = result;
            Some(WorkflowEvent::TaskCompleted {
                workflow_id,
                task_id: settlement.task_id,
                success: true,
            })
        }
        Err(failure) => {
            task.status = TaskStatus::Failed;
            task.error = Some(failure.to_string());

            let retry = (failure.is_retryable() && task.retries.unwrap_or(0) > 0)
                .then(|| retry_clone(task));
            if let Some(clone) = retry {
                tracing::info!(
                    workflow_id = %workflow_id,
                    task_id = settlement.task_id.as_str(),
                    retry_task_id = clone.id.as_str(),
                    retries_left = clone.retries.unwrap_or(0),
                    "scheduling retry"
                );
                workflow.tasks.push(clone);
            }

            Some(match failure {
                TaskFailure::Rejected(_) => WorkflowEvent::TaskCompleted {
                    workflow_id,
                    task_id: settlement.task_id,
                    success: false,
                },
                other => WorkflowEvent::TaskFailed {
                    workflow_id,
                    task_id: settlement.task_id,
                    error: other.to_string(),
                },
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("executor panicked: {detail}")
}

/// Run one task against its executor, racing the optional timeout.
async fn run_task(
    executor: Option<Arc<BoxTaskExecutor>>,
    task: Task,
    context: HashMap<String, Value>,
) -> Settlement {
    let task_id = task.id.clone();
    let Some(executor) = executor else {
        return Settlement {
            task_id,
            result: Err(TaskFailure::MissingExecutor {
                action: task.action,
            }),
            context_updates: HashMap::new(),
        };
    };

    let timeout_ms = task.timeout_ms.filter(|ms| *ms > 0);
    let call = AssertUnwindSafe(executor.execute(task, context)).catch_unwind();

    let joined = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), call).await {
            Ok(joined) => joined,
            Err(_) => {
                return Settlement {
                    task_id,
                    result: Err(TaskFailure::Timeout { timeout_ms: ms }),
                    context_updates: HashMap::new(),
                };
            }
        },
        None => call.await,
    };

    let (result, context_updates) = match joined {
        Ok(Ok(TaskOutcome {
            success: true,
            result,
            context_updates,
            ..
        })) => (Ok(result), context_updates),
        Ok(Ok(TaskOutcome { error, .. })) => (
            Err(TaskFailure::Rejected(
                error.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            )),
            HashMap::new(),
        ),
        Ok(Err(e)) => (Err(TaskFailure::Execution(format!("{e:#}"))), HashMap::new()),
        Err(payload) => (
            Err(TaskFailure::Execution(panic_message(payload))),
            HashMap::new(),
        ),
    };

    Settlement {
        task_id,
        result,
        context_updates,
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct DriverHandle {
    wake: Arc<Notify>,
    epoch: Arc<AtomicU64>,
}

struct Shared<S> {
    repository: Arc<WorkflowRepository<S>>,
    executors: Arc<ExecutorRegistry>,
    event_bus: EventBus,
    conditions: ConditionEvaluator,
    drivers: DashMap<Uuid, DriverHandle>,
    shutdown: CancellationToken,
}

/// Owns the per-workflow drivers.
pub struct Scheduler<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: StateStore + 'static> Scheduler<S> {
    pub fn new(
        repository: Arc<WorkflowRepository<S>>,
        executors: Arc<ExecutorRegistry>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                repository,
                executors,
                event_bus,
                conditions: ConditionEvaluator::new(),
                drivers: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Make sure a driver is working on `workflow_id`.
    ///
    /// Spawns one if none exists; otherwise wakes the existing driver so it
    /// runs another pass. Must be called from within a tokio runtime.
    pub fn ensure_driver(&self, workflow_id: Uuid) {
        if self.shared.shutdown.is_cancelled() {
            tracing::debug!(workflow_id = %workflow_id, "scheduler shut down, not starting driver");
            return;
        }

        match self.shared.drivers.entry(workflow_id) {
            Entry::Occupied(entry) => {
                let handle = entry.get();
                handle.epoch.fetch_add(1, Ordering::SeqCst);
                handle.wake.notify_one();
            }
            Entry::Vacant(entry) => {
                let handle = DriverHandle::default();
                entry.insert(handle.clone());

                let shared = Arc::clone(&self.shared);
                let span = tracing::info_span!("workflow_driver", workflow_id = %workflow_id);
                tokio::spawn(shared.drive(workflow_id, handle).instrument(span));
            }
        }
    }

    pub fn is_driving(&self, workflow_id: &Uuid) -> bool {
        self.shared.drivers.contains_key(workflow_id)
    }

    pub fn driver_count(&self) -> usize {
        self.shared.drivers.len()
    }

    /// Stop all drivers. In-flight executions are aborted and their tasks
    /// stay Running in the persisted snapshot.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

impl<S: StateStore + 'static> Shared<S> {
    async fn drive(self: Arc<Self>, workflow_id: Uuid, handle: DriverHandle) {
        tracing::debug!("driver started");
        let mut in_flight: JoinSet<Settlement> = JoinSet::new();

        loop {
            let seen = handle.epoch.load(Ordering::SeqCst);
            let pass = self.run_pass(workflow_id, &mut in_flight).await;

            if in_flight.is_empty() {
                if pass.waiting && pass.dispatched == 0 {
                    tracing::warn!(
                        "workflow stalled: tasks remain but none are ready or running"
                    );
                }
                if self
                    .drivers
                    .remove_if(&workflow_id, |_, h| h.epoch.load(Ordering::SeqCst) == seen)
                    .is_some()
                {
                    break;
                }
                continue;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    match joined {
                        Some(Ok(settlement)) => self.settle(workflow_id, settlement).await,
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "task execution join failed");
                        }
                        None => {}
                    }
                }
                _ = handle.wake.notified() => {}
                _ = self.shutdown.cancelled() => {
                    in_flight.abort_all();
                    self.drivers.remove(&workflow_id);
                    tracing::debug!("driver stopped by shutdown");
                    break;
                }
            }
        }

        tracing::debug!("driver exited");
    }

    async fn run_pass(&self, workflow_id: Uuid, in_flight: &mut JoinSet<Settlement>) -> PassSummary {
        let Some(pass) = self
            .repository
            .update(&workflow_id, |wf| plan_pass(wf, &self.conditions))
        else {
            tracing::warn!("workflow disappeared from repository");
            return PassSummary::default();
        };

        let changed = !pass.skipped.is_empty() || !pass.dispatched.is_empty() || pass.finalized.is_some();
        if let Some(success) = pass.finalized {
            self.repository.deactivate(&workflow_id);
            tracing::info!(success, "workflow finished");
        }
        if changed {
            self.repository.persist().await;
        }

        for task_id in pass.skipped {
            self.event_bus.publish(WorkflowEvent::TaskSkipped {
                workflow_id,
                task_id,
            });
        }

        let dispatched = pass.dispatched.len();
        for Dispatch { task, context } in pass.dispatched {
            tracing::debug!(task_id = task.id.as_str(), action = task.action.as_str(), "dispatching task");
            self.event_bus.publish(WorkflowEvent::TaskStarted {
                workflow_id,
                task_id: task.id.clone(),
            });
            let executor = self.executors.get(&task.action);
            in_flight.spawn(run_task(executor, task, context));
        }

        if let Some(success) = pass.finalized {
            self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
                workflow_id,
                success,
            });
        }

        PassSummary {
            waiting: pass.waiting,
            dispatched,
        }
    }

    async fn settle(&self, workflow_id: Uuid, settlement: Settlement) {
        let task_id = settlement.task_id.clone();
        let event = self
            .repository
            .update(&workflow_id, |wf| apply_settlement(wf, settlement))
            .flatten();

        let Some(event) = event else {
            tracing::debug!(task_id = task_id.as_str(), "discarding late settlement");
            return;
        };

        match &event {
            WorkflowEvent::TaskFailed { error, .. } => {
                tracing::warn!(task_id = task_id.as_str(), error = error.as_str(), "task failed");
            }
            WorkflowEvent::TaskCompleted { success, .. } => {
                tracing::debug!(task_id = task_id.as_str(), success, "task settled");
            }
            _ => {}
        }

        self.repository.persist().await;
        self.event_bus.publish(event);
    }
}

#[derive(Debug, Default)]
struct PassSummary {
    waiting: bool,
    dispatched: usize,
}
