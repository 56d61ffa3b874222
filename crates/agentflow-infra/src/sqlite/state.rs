//! SQLite state store.
//!
//! Implements `StateStore` over the `engine_state` table. Values are stored
//! as JSON text and parsed on read.

use agentflow_core::storage::StateStore;
use agentflow_types::error::RepositoryError;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StateStore`.
pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM engine_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let text: String = row
            .try_get("value")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        let text = serde_json::to_string(value)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;

        sqlx::query(
            "INSERT INTO engine_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}
