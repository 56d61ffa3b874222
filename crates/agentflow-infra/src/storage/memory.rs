//! Process-local state store.

use agentflow_core::storage::StateStore;
use agentflow_types::error::RepositoryError;
use dashmap::DashMap;
use serde_json::Value;

/// `StateStore` backed by a `DashMap`. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: DashMap<String, Value>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }
}
