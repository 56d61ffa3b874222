//! Non-SQLite state stores and backend selection.

pub mod json_file;
pub mod memory;

use std::path::Path;

use agentflow_core::storage::StateStore;
use agentflow_types::config::{StorageBackend, StorageConfig};
use agentflow_types::error::RepositoryError;
use serde_json::Value;

use crate::sqlite::pool::{DatabasePool, default_database_path};
use crate::sqlite::state::SqliteStateStore;

pub use json_file::JsonFileStateStore;
pub use memory::MemoryStateStore;

/// The state store chosen by `[storage]` in `config.toml`.
pub enum ConfiguredStateStore {
    Memory(MemoryStateStore),
    Json(JsonFileStateStore),
    Sqlite(SqliteStateStore),
}

impl ConfiguredStateStore {
    pub fn backend(&self) -> StorageBackend {
        match self {
            ConfiguredStateStore::Memory(_) => StorageBackend::Memory,
            ConfiguredStateStore::Json(_) => StorageBackend::Json,
            ConfiguredStateStore::Sqlite(_) => StorageBackend::Sqlite,
        }
    }
}

impl StateStore for ConfiguredStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        match self {
            ConfiguredStateStore::Memory(s) => s.get(key).await,
            ConfiguredStateStore::Json(s) => s.get(key).await,
            ConfiguredStateStore::Sqlite(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        match self {
            ConfiguredStateStore::Memory(s) => s.set(key, value).await,
            ConfiguredStateStore::Json(s) => s.set(key, value).await,
            ConfiguredStateStore::Sqlite(s) => s.set(key, value).await,
        }
    }
}

/// Open the configured backend. Paths default to `{data_dir}/agentflow.db`
/// (sqlite) and `{data_dir}/state` (json).
pub async fn open_state_store(
    config: &StorageConfig,
    data_dir: &Path,
) -> Result<ConfiguredStateStore, RepositoryError> {
    let store = match config.backend {
        StorageBackend::Memory => ConfiguredStateStore::Memory(MemoryStateStore::new()),
        StorageBackend::Json => {
            let dir = config
                .path
                .clone()
                .unwrap_or_else(|| data_dir.join("state"));
            ConfiguredStateStore::Json(JsonFileStateStore::open(dir).await?)
        }
        StorageBackend::Sqlite => {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| default_database_path(data_dir));
            let pool = DatabasePool::open_file(&path).await.map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "failed to open sqlite database");
                RepositoryError::Connection
            })?;
            ConfiguredStateStore::Sqlite(SqliteStateStore::new(pool))
        }
    };
    tracing::info!(backend = %store.backend(), "state store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn json_backend_defaults_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Json,
            path: None,
        };
        let store = open_state_store(&config, dir.path()).await.unwrap();
        assert_eq!(store.backend(), StorageBackend::Json);

        store.set("k", &json!("v")).await.unwrap();
        assert!(dir.path().join("state").join("k.json").exists());
    }

    #[tokio::test]
    async fn sqlite_backend_defaults_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_state_store(&StorageConfig::default(), dir.path())
            .await
            .unwrap();
        assert_eq!(store.backend(), StorageBackend::Sqlite);

        store.set("k", &json!([1])).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!([1])));
        assert!(dir.path().join("agentflow.db").exists());
    }

    #[tokio::test]
    async fn memory_backend_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            path: None,
        };
        let store = open_state_store(&config, dir.path()).await.unwrap();
        store.set("k", &json!(true)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(true)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
