//! Key-value state store trait.
//!
//! The engine persists its whole workflow registry as a single JSON value
//! under one key. Implementations live in agentflow-infra.

use std::sync::Arc;

use agentflow_types::error::RepositoryError;

/// Trait for persistent JSON key-value storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait StateStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

impl<T: StateStore> StateStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        T::get(self, key).await
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        T::set(self, key, value).await
    }
}
