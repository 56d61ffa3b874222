//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` in the data directory. Every
//! field has a default, so an empty file (or no file) is a valid config.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// State key the engine snapshot is stored under.
pub const DEFAULT_STATE_KEY: &str = "workflowEngine";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory of `<template-id>.json` files. `None` keeps templates in memory only.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,

    /// Key the workflow snapshot is persisted under.
    #[serde(default = "default_state_key")]
    pub state_key: String,

    /// Capacity of the broadcast event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Re-enter the scheduler for persisted running workflows on open.
    #[serde(default = "default_true")]
    pub resume_on_open: bool,

    /// Reset tasks persisted as running back to pending on open.
    #[serde(default = "default_true")]
    pub requeue_interrupted_tasks: bool,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_state_key() -> String {
    DEFAULT_STATE_KEY.to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dir: None,
            state_key: default_state_key(),
            event_capacity: default_event_capacity(),
            resume_on_open: true,
            requeue_interrupted_tasks: true,
            storage: StorageConfig::default(),
        }
    }
}

/// Where the engine snapshot lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file (sqlite) or directory (json). Defaults under the data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Snapshot storage backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local; nothing survives a restart.
    Memory,
    /// One JSON file per key.
    Json,
    #[default]
    Sqlite,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Json => write!(f, "json"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.state_key, "workflowEngine");
        assert_eq!(config.event_capacity, 1024);
        assert!(config.resume_on_open);
        assert!(config.requeue_interrupted_tasks);
        assert!(config.template_dir.is_none());
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn deserialize_empty_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn deserialize_with_values() {
        let toml_str = r#"
template_dir = "/var/lib/agentflow/templates"
state_key = "engine"
resume_on_open = false

[storage]
backend = "json"
path = "/var/lib/agentflow/state"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.state_key, "engine");
        assert!(!config.resume_on_open);
        assert!(config.requeue_interrupted_tasks);
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(
            config.template_dir,
            Some(PathBuf::from("/var/lib/agentflow/templates"))
        );
    }
}
