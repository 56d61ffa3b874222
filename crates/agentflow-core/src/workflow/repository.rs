//! In-memory workflow registry with snapshot persistence.
//!
//! The registry is authoritative: every read and mutation goes through the
//! `DashMap`, and the whole registry plus the active set is written to the
//! [`StateStore`] as one JSON snapshot after each state change.
//!
//! Mutations happen under the entry's shard guard with no await held.
//! Snapshot writes are serialized by `persist_lock` and always capture the
//! latest state at the time the lock is acquired.

use agentflow_types::error::RepositoryError;
use agentflow_types::workflow::{EngineSnapshot, Workflow};
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::storage::StateStore;

pub struct WorkflowRepository<S> {
    workflows: DashMap<Uuid, Workflow>,
    active: DashSet<Uuid>,
    store: S,
    state_key: String,
    persist_lock: Mutex<()>,
}

impl<S: StateStore> WorkflowRepository<S> {
    pub fn new(store: S, state_key: impl Into<String>) -> Self {
        Self {
            workflows: DashMap::new(),
            active: DashSet::new(),
            store,
            state_key: state_key.into(),
            persist_lock: Mutex::new(()),
        }
    }

    /// Load the persisted snapshot into memory, replacing nothing that is
    /// already registered. Returns the number of workflows restored.
    pub async fn restore(&self) -> Result<usize, RepositoryError> {
        let Some(value) = self.store.get(&self.state_key).await? else {
            return Ok(0);
        };

        let snapshot: EngineSnapshot = serde_json::from_value(value)
            .map_err(|e| RepositoryError::Query(format!("malformed engine snapshot: {e}")))?;

        let mut restored = 0;
        for (id, workflow) in snapshot.workflows {
            if id != workflow.id {
                tracing::warn!(key = %id, workflow_id = %workflow.id, "snapshot key mismatch, using embedded id");
            }
            if !self.workflows.contains_key(&workflow.id) {
                self.workflows.insert(workflow.id, workflow);
                restored += 1;
            }
        }
        for id in snapshot.active_workflows {
            if self.workflows.contains_key(&id) {
                self.active.insert(id);
            }
        }

        tracing::debug!(restored, active = self.active.len(), "restored engine snapshot");
        Ok(restored)
    }

    pub fn insert(&self, workflow: Workflow) {
        self.workflows.insert(workflow.id, workflow);
    }

    pub fn get(&self, id: &Uuid) -> Option<Workflow> {
        self.workflows.get(id).map(|w| w.value().clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.workflows.contains_key(id)
    }

    /// All workflows, oldest first.
    pub fn list(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> =
            self.workflows.iter().map(|w| w.value().clone()).collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        workflows
    }

    /// Mutate a workflow in place. Returns `None` if the ID is unknown.
    ///
    /// `f` runs while the shard is locked; it must not block.
    pub fn update<R>(&self, id: &Uuid, f: impl FnOnce(&mut Workflow) -> R) -> Option<R> {
        self.workflows.get_mut(id).map(|mut entry| f(entry.value_mut()))
    }

    pub fn activate(&self, id: Uuid) {
        self.active.insert(id);
    }

    pub fn deactivate(&self, id: &Uuid) {
        self.active.remove(id);
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        self.active.contains(id)
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.active.iter().map(|id| *id).collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            workflows: self.list().into_iter().map(|w| (w.id, w)).collect(),
            active_workflows: self.active_ids(),
        }
    }

    /// Write the current snapshot, surfacing storage errors.
    pub async fn try_persist(&self) -> Result<(), RepositoryError> {
        let _guard = self.persist_lock.lock().await;
        let value = serde_json::to_value(self.snapshot())
            .map_err(|e| RepositoryError::Query(format!("failed to serialize snapshot: {e}")))?;
        self.store.set(&self.state_key, &value).await
    }

    /// Best-effort snapshot write; failures are logged.
    pub async fn persist(&self) {
        if let Err(e) = self.try_persist().await {
            tracing::warn!(key = self.state_key.as_str(), error = %e, "failed to persist engine state");
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agentflow_types::workflow::WorkflowStatus;
    use chrono::{Duration, Utc};
    use serde_json::Value;

    #[derive(Default)]
    struct MockStore {
        values: DashMap<String, Value>,
        writes: AtomicUsize,
        fail_writes: bool,
    }

    impl StateStore for MockStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
            Ok(self.values.get(key).map(|v| v.value().clone()))
        }

        async fn set(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
            if self.fail_writes {
                return Err(RepositoryError::Connection);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.values.insert(key.to_string(), value.clone());
            Ok(())
        }
    }

    fn workflow(name: &str, age_secs: i64) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: None,
            version: "1.0.0".to_string(),
            tasks: vec![],
            status: WorkflowStatus::Pending,
            context: HashMap::new(),
            owner: None,
            template_id: None,
            created_at: Utc::now() - Duration::seconds(age_secs),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn list_orders_by_creation() {
        let repo = WorkflowRepository::new(MockStore::default(), "k");
        let newer = workflow("newer", 10);
        let older = workflow("older", 100);
        repo.insert(newer);
        repo.insert(older);

        let names: Vec<_> = repo.list().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["older", "newer"]);
    }

    #[test]
    fn update_mutates_in_place() {
        let repo = WorkflowRepository::new(MockStore::default(), "k");
        let wf = workflow("wf", 0);
        let id = wf.id;
        repo.insert(wf);

        let previous = repo.update(&id, |w| std::mem::replace(&mut w.status, WorkflowStatus::Running));
        assert_eq!(previous, Some(WorkflowStatus::Pending));
        assert_eq!(repo.get(&id).unwrap().status, WorkflowStatus::Running);
        assert!(repo.update(&Uuid::now_v7(), |_| ()).is_none());
    }

    #[tokio::test]
    async fn persist_then_restore_roundtrips_active_set() {
        let store = Arc::new(MockStore::default());
        let repo = WorkflowRepository::new(Arc::clone(&store), "engine");
        let wf = workflow("wf", 0);
        let id = wf.id;
        repo.insert(wf);
        repo.activate(id);
        repo.try_persist().await.unwrap();

        let raw = store.values.get("engine").unwrap().value().clone();
        assert!(raw.get("activeWorkflows").is_some());

        let restored = WorkflowRepository::new(Arc::clone(&store), "engine");
        assert_eq!(restored.restore().await.unwrap(), 1);
        assert!(restored.is_active(&id));
        assert_eq!(restored.get(&id).unwrap().name, "wf");
    }

    #[tokio::test]
    async fn restore_with_empty_store_is_noop() {
        let repo = WorkflowRepository::new(MockStore::default(), "engine");
        assert_eq!(repo.restore().await.unwrap(), 0);
        assert!(repo.list().is_empty());
    }

    #[tokio::test]
    async fn restore_rejects_malformed_snapshot() {
        let store = MockStore::default();
        store
            .values
            .insert("engine".to_string(), serde_json::json!({"workflows": 7}));
        let repo = WorkflowRepository::new(store, "engine");
        assert!(matches!(repo.restore().await, Err(RepositoryError::Query(_))));
    }

    #[tokio::test]
    async fn persist_swallows_write_errors() {
        let store = MockStore {
            fail_writes: true,
            ..Default::default()
        };
        let repo = WorkflowRepository::new(store, "engine");
        repo.insert(workflow("wf", 0));

        repo.persist().await;
        assert!(repo.try_persist().await.is_err());
        assert_eq!(repo.store().writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deactivate_removes_from_snapshot() {
        let repo = WorkflowRepository::new(MockStore::default(), "engine");
        let wf = workflow("wf", 0);
        let id = wf.id;
        repo.insert(wf);
        repo.activate(id);
        repo.deactivate(&id);

        assert!(repo.snapshot().active_workflows.is_empty());
        assert_eq!(repo.snapshot().workflows.len(), 1);
    }
}
