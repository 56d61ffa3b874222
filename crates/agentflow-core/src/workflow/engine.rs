//! `WorkflowEngine`: the public handle over templates, workflows and drivers.
//!
//! The engine is constructed by the host and cloned freely; clones share
//! one template store, one workflow repository, one executor registry and
//! one scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_types::config::EngineConfig;
use agentflow_types::error::EngineError;
use agentflow_types::event::WorkflowEvent;
use agentflow_types::task::{Task, TaskOutcome, TaskStatus};
use agentflow_types::template::{Template, TemplatePatch, TemplateSpec};
use agentflow_types::workflow::{Workflow, WorkflowOptions, WorkflowSpec, WorkflowStatus};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::event::EventBus;
use crate::storage::StateStore;

use super::dag;
use super::registry::{ExecutorRegistry, TaskExecutor};
use super::repository::WorkflowRepository;
use super::scheduler::Scheduler;
use super::template::{TemplateStore, normalize_task_ids};

/// Result of a lifecycle transition attempted under the workflow's entry.
enum Transition {
    Changed(Workflow),
    Unchanged(Workflow),
}

struct EngineInner<S> {
    config: EngineConfig,
    templates: TemplateStore,
    repository: Arc<WorkflowRepository<S>>,
    executors: Arc<ExecutorRegistry>,
    scheduler: Scheduler<S>,
    event_bus: EventBus,
}

/// Workflow orchestration engine.
pub struct WorkflowEngine<S> {
    inner: Arc<EngineInner<S>>,
}

impl<S> Clone for WorkflowEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StateStore + 'static> WorkflowEngine<S> {
    /// Open an engine over `store` with an empty executor registry.
    ///
    /// Workflows resumed on open are dispatched right away, so hosts that
    /// rely on `resume_on_open` should register executors up front with
    /// [`WorkflowEngine::open_with_executors`].
    pub async fn open(config: EngineConfig, store: S) -> Result<Self, EngineError> {
        Self::open_with_executors(config, store, ExecutorRegistry::new()).await
    }

    pub async fn open_with_executors(
        config: EngineConfig,
        store: S,
        executors: ExecutorRegistry,
    ) -> Result<Self, EngineError> {
        let event_bus = EventBus::new(config.event_capacity);
        Self::open_with_bus(config, store, executors, event_bus).await
    }

    /// Open an engine publishing on an existing event bus.
    ///
    /// Loads templates from disk, restores the persisted snapshot, requeues
    /// interrupted tasks and resumes active workflows, as configured.
    pub async fn open_with_bus(
        config: EngineConfig,
        store: S,
        executors: ExecutorRegistry,
        event_bus: EventBus,
    ) -> Result<Self, EngineError> {
        let templates = TemplateStore::new(config.template_dir.clone(), event_bus.clone());
        templates.load().await;

        let repository = Arc::new(WorkflowRepository::new(store, config.state_key.clone()));
        let restored = repository.restore().await?;

        let executors = Arc::new(executors);
        let scheduler = Scheduler::new(
            Arc::clone(&repository),
            Arc::clone(&executors),
            event_bus.clone(),
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                config,
                templates,
                repository,
                executors,
                scheduler,
                event_bus,
            }),
        };

        if restored > 0 {
            if engine.inner.config.requeue_interrupted_tasks {
                engine.requeue_interrupted().await;
            }
            if engine.inner.config.resume_on_open {
                engine.resume_active_workflows();
            }
        }

        tracing::info!(
            restored,
            templates = engine.inner.templates.len(),
            "workflow engine opened"
        );
        Ok(engine)
    }

    /// Reset tasks left Running by a previous process back to Pending.
    async fn requeue_interrupted(&self) {
        let mut requeued = 0;
        for workflow in self.inner.repository.list() {
            if !workflow.status.is_terminal() {
                requeued += self.reset_running_tasks(&workflow.id);
            }
        }

        if requeued > 0 {
            tracing::info!(requeued, "requeued interrupted tasks");
            self.inner.repository.persist().await;
        }
    }

    /// Reset one workflow's Running tasks to Pending so a new driver
    /// dispatches them again. Returns how many tasks were reset.
    ///
    /// Only call this when no other process is driving the workflow;
    /// otherwise its in-flight tasks run twice.
    pub async fn requeue_interrupted_tasks(&self, id: &Uuid) -> Result<usize, EngineError> {
        let workflow = self
            .get_workflow(id)
            .ok_or(EngineError::WorkflowNotFound(*id))?;
        if workflow.status.is_terminal() {
            return Ok(0);
        }

        let requeued = self.reset_running_tasks(id);
        if requeued > 0 {
            tracing::info!(workflow_id = %id, requeued, "requeued interrupted tasks");
            self.inner.repository.persist().await;
        }
        Ok(requeued)
    }

    fn reset_running_tasks(&self, id: &Uuid) -> usize {
        self.inner
            .repository
            .update(id, |wf| {
                let mut count = 0;
                for task in wf.tasks.iter_mut().filter(|t| t.status == TaskStatus::Running) {
                    task.status = TaskStatus::Pending;
                    task.start_time = None;
                    task.dependency_results.clear();
                    count += 1;
                }
                count
            })
            .unwrap_or(0)
    }

    /// Ensure a driver for every active workflow that is Running.
    ///
    /// Called on open when `resume_on_open` is set; hosts that register
    /// executors after opening call it themselves.
    pub fn resume_active_workflows(&self) {
        for id in self.inner.repository.active_ids() {
            let running = self
                .inner
                .repository
                .get(&id)
                .is_some_and(|wf| wf.status == WorkflowStatus::Running);
            if running {
                tracing::info!(workflow_id = %id, "resuming workflow");
                self.inner.scheduler.ensure_driver(id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.inner.executors
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.inner.templates
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.inner.scheduler
    }

    pub fn register_executor<T: TaskExecutor + 'static>(&self, action: impl Into<String>, executor: T) {
        self.inner.executors.register(action, executor);
    }

    pub fn register_fn<F, Fut>(&self, action: impl Into<String>, f: F)
    where
        F: Fn(Task, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<TaskOutcome>> + Send + 'static,
    {
        self.inner.executors.register_fn(action, f);
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    pub async fn create_template(&self, spec: TemplateSpec) -> Result<Template, EngineError> {
        let template = self.inner.templates.create(spec).await?;
        dag::analyze(&template.tasks).log_problems(&template.name);
        Ok(template)
    }

    pub fn get_template(&self, id: &Uuid) -> Option<Template> {
        self.inner.templates.get(id)
    }

    /// Look up a template by UUID, falling back to name.
    pub fn resolve_template(&self, id_or_name: &str) -> Option<Template> {
        self.inner.templates.resolve(id_or_name)
    }

    pub fn list_templates(&self) -> Vec<Template> {
        self.inner.templates.list()
    }

    pub async fn update_template(&self, id: &Uuid, patch: TemplatePatch) -> Result<Template, EngineError> {
        self.inner.templates.update(id, patch).await
    }

    pub async fn delete_template(&self, id: &Uuid) -> Result<bool, EngineError> {
        self.inner.templates.delete(id).await
    }

    // -----------------------------------------------------------------------
    // Workflow factory
    // -----------------------------------------------------------------------

    /// Create a workflow from an inline definition.
    ///
    /// Task IDs are kept; empty IDs are filled in and duplicates rejected.
    pub async fn create_workflow(
        &self,
        spec: WorkflowSpec,
        options: WorkflowOptions,
    ) -> Result<Workflow, EngineError> {
        if spec.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "workflow name cannot be empty".to_string(),
            ));
        }

        let mut tasks = spec.tasks;
        normalize_task_ids(&mut tasks)?;

        let mut context = spec.context;
        context.extend(options.context);
        let mut metadata = spec.metadata;
        metadata.extend(options.metadata);

        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: spec.name,
            description: spec.description,
            version: spec.version,
            tasks: tasks.into_iter().map(Task::from_spec).collect(),
            status: WorkflowStatus::Pending,
            context,
            owner: options.owner.or(spec.owner),
            template_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata,
        };

        self.register_new(workflow, options.auto_start).await
    }

    /// Instantiate a template (resolved by UUID, then by name).
    ///
    /// Every task gets a fresh ID; dependencies and task-referencing
    /// conditions are remapped. References outside the template are kept.
    pub async fn create_workflow_from_template(
        &self,
        template_id_or_name: &str,
        options: WorkflowOptions,
    ) -> Result<Workflow, EngineError> {
        let template = self
            .inner
            .templates
            .resolve(template_id_or_name)
            .ok_or_else(|| EngineError::TemplateNotFound(template_id_or_name.to_string()))?;

        let mut specs = template.tasks;
        normalize_task_ids(&mut specs)?;

        let id_map: HashMap<String, String> = specs
            .iter()
            .map(|spec| (spec.id.clone(), Uuid::now_v7().to_string()))
            .collect();

        let tasks = specs
            .into_iter()
            .map(|mut spec| {
                if let Some(new_id) = id_map.get(&spec.id) {
                    spec.id = new_id.clone();
                }
                for dep in spec.dependencies.iter_mut() {
                    if let Some(new_id) = id_map.get(dep.as_str()) {
                        *dep = new_id.clone();
                    }
                }
                for condition in spec.conditions.iter_mut() {
                    condition.remap_task_id(&id_map);
                }
                Task::from_spec(spec)
            })
            .collect();

        let mut context = template.variables;
        context.extend(options.context);
        let mut metadata = template.metadata;
        metadata.extend(options.metadata);

        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: template.name,
            description: template.description,
            version: template.version,
            tasks,
            status: WorkflowStatus::Pending,
            context,
            owner: options.owner,
            template_id: Some(template.id),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata,
        };

        self.register_new(workflow, options.auto_start).await
    }

    async fn register_new(&self, workflow: Workflow, auto_start: bool) -> Result<Workflow, EngineError> {
        let id = workflow.id;
        dag::analyze(&workflow.tasks).log_problems(&workflow.name);

        tracing::info!(
            workflow_id = %id,
            name = workflow.name.as_str(),
            tasks = workflow.tasks.len(),
            template_id = ?workflow.template_id,
            "workflow created"
        );

        self.inner.repository.insert(workflow.clone());
        self.inner.repository.persist().await;
        self.inner
            .event_bus
            .publish(WorkflowEvent::WorkflowCreated { workflow_id: id });

        if auto_start {
            return self.start(&id).await;
        }
        Ok(workflow)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_workflow(&self, id: &Uuid) -> Option<Workflow> {
        self.inner.repository.get(id)
    }

    /// All workflows, oldest first.
    pub fn list_workflows(&self) -> Vec<Workflow> {
        self.inner.repository.list()
    }

    pub fn active_workflows(&self) -> Vec<Uuid> {
        self.inner.repository.active_ids()
    }

    pub fn get_task(&self, workflow_id: &Uuid, task_id: &str) -> Result<Task, EngineError> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or(EngineError::WorkflowNotFound(*workflow_id))?;
        workflow
            .task(task_id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound {
                workflow_id: *workflow_id,
                task_id: task_id.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn transition<R>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Workflow) -> R,
    ) -> Result<R, EngineError> {
        self.inner
            .repository
            .update(id, f)
            .ok_or(EngineError::WorkflowNotFound(*id))
    }

    /// Start a workflow. Starting a Running workflow is a no-op; starting a
    /// terminal one is rejected.
    pub async fn start(&self, id: &Uuid) -> Result<Workflow, EngineError> {
        let transition = self.transition(id, |wf| match wf.status {
            WorkflowStatus::Running => Ok(Transition::Unchanged(wf.clone())),
            status if status.is_terminal() => Err(status),
            _ => {
                wf.status = WorkflowStatus::Running;
                wf.started_at.get_or_insert_with(Utc::now);
                Ok(Transition::Changed(wf.clone()))
            }
        })?;
        let transition = transition.map_err(|status| EngineError::InvalidTransition {
            workflow_id: *id,
            status,
            action: "start",
        })?;

        match transition {
            Transition::Changed(workflow) => {
                self.inner.repository.activate(*id);
                self.inner.repository.persist().await;
                tracing::info!(workflow_id = %id, "workflow started");
                self.inner
                    .event_bus
                    .publish(WorkflowEvent::WorkflowStarted { workflow_id: *id });
                self.inner.scheduler.ensure_driver(*id);
                Ok(workflow)
            }
            Transition::Unchanged(workflow) => Ok(workflow),
        }
    }

    /// Pause a Running workflow. In-flight tasks keep running and their
    /// results are recorded; nothing new is dispatched until resume.
    pub async fn pause(&self, id: &Uuid) -> Result<Workflow, EngineError> {
        let transition = self.transition(id, |wf| {
            if wf.status != WorkflowStatus::Running {
                return Transition::Unchanged(wf.clone());
            }
            wf.status = WorkflowStatus::Paused;
            Transition::Changed(wf.clone())
        })?;

        match transition {
            Transition::Changed(workflow) => {
                self.inner.repository.deactivate(id);
                self.inner.repository.persist().await;
                tracing::info!(workflow_id = %id, "workflow paused");
                self.inner
                    .event_bus
                    .publish(WorkflowEvent::WorkflowPaused { workflow_id: *id });
                Ok(workflow)
            }
            Transition::Unchanged(workflow) => Ok(workflow),
        }
    }

    /// Resume a Paused workflow.
    pub async fn resume(&self, id: &Uuid) -> Result<Workflow, EngineError> {
        let transition = self.transition(id, |wf| {
            if wf.status != WorkflowStatus::Paused {
                return Transition::Unchanged(wf.clone());
            }
            wf.status = WorkflowStatus::Running;
            Transition::Changed(wf.clone())
        })?;

        match transition {
            Transition::Changed(workflow) => {
                self.inner.repository.activate(*id);
                self.inner.repository.persist().await;
                tracing::info!(workflow_id = %id, "workflow resumed");
                self.inner
                    .event_bus
                    .publish(WorkflowEvent::WorkflowResumed { workflow_id: *id });
                self.inner.scheduler.ensure_driver(*id);
                Ok(workflow)
            }
            Transition::Unchanged(workflow) => Ok(workflow),
        }
    }

    /// Cancel a non-terminal workflow.
    ///
    /// Running tasks become Cancelled and Pending ones Skipped. Executors
    /// already in flight are not interrupted; their results are discarded.
    pub async fn cancel(&self, id: &Uuid) -> Result<Workflow, EngineError> {
        let transition = self.transition(id, |wf| {
            if wf.status.is_terminal() {
                return Transition::Unchanged(wf.clone());
            }
            let now = Utc::now();
            wf.status = WorkflowStatus::Cancelled;
            wf.completed_at = Some(now);
            for task in wf.tasks.iter_mut() {
                match task.status {
                    TaskStatus::Running => {
                        task.status = TaskStatus::Cancelled;
                        task.end_time = Some(now);
                    }
                    TaskStatus::Pending => task.status = TaskStatus::Skipped,
                    _ => {}
                }
            }
            Transition::Changed(wf.clone())
        })?;

        match transition {
            Transition::Changed(workflow) => {
                self.inner.repository.deactivate(id);
                self.inner.repository.persist().await;
                tracing::info!(workflow_id = %id, "workflow cancelled");
                self.inner
                    .event_bus
                    .publish(WorkflowEvent::WorkflowCancelled { workflow_id: *id });
                Ok(workflow)
            }
            Transition::Unchanged(workflow) => Ok(workflow),
        }
    }

    /// Wait until the workflow reaches a terminal status.
    ///
    /// A stalled workflow never finishes; callers that need a bound should
    /// wrap this in `tokio::time::timeout`.
    pub async fn wait_for_completion(&self, id: &Uuid) -> Result<Workflow, EngineError> {
        let mut rx = self.subscribe();
        loop {
            let workflow = self
                .get_workflow(id)
                .ok_or(EngineError::WorkflowNotFound(*id))?;
            if workflow.status.is_terminal() {
                return Ok(workflow);
            }

            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(workflow),
            }
        }
    }

    /// Stop all drivers and write a final snapshot.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        self.inner.repository.persist().await;
        tracing::info!("workflow engine shut down");
    }
}
