//! JSON-file state store: one `<key>.json` file per key.
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous value readable.

use std::path::{Path, PathBuf};

use agentflow_core::storage::StateStore;
use agentflow_types::error::RepositoryError;
use serde_json::Value;
use tokio::sync::Mutex;

pub struct JsonFileStateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStateStore {
    /// Open (creating if needed) the directory holding the key files.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            tracing::error!(dir = %dir.display(), error = %e, "failed to create state directory");
            RepositoryError::Connection
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

/// Map a key to a safe file stem. Anything outside `[A-Za-z0-9_-]` becomes `_`.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl StateStore for JsonFileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RepositoryError::Query(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| RepositoryError::Query(format!("invalid JSON in {}: {e}", path.display())))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            RepositoryError::Query(format!("failed to replace {}: {e}", path.display()))
        })?;
        tracing::debug!(key, path = %path.display(), "state written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStateStore::open(dir.path()).await.unwrap();
            store.set("workflowEngine", &json!({"workflows": []})).await.unwrap();
        }

        let reopened = JsonFileStateStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("workflowEngine").await.unwrap(),
            Some(json!({"workflows": []}))
        );
        assert!(dir.path().join("workflowEngine.json").exists());
        assert!(!dir.path().join("workflowEngine.json.tmp").exists());
    }

    #[tokio::test]
    async fn unsafe_key_characters_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::open(dir.path()).await.unwrap();
        store.set("../escape/me", &json!(1)).await.unwrap();

        assert!(dir.path().join("___escape_me.json").exists());
        assert_eq!(store.get("../escape/me").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn corrupt_file_is_query_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.json"), "{ nope").await.unwrap();
        let store = JsonFileStateStore::open(dir.path()).await.unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Query(_)));
    }
}
