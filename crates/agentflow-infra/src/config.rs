//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.agentflow/` in
//! production) and deserializes it into [`EngineConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use agentflow_types::config::EngineConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "AGENTFLOW_DATA_DIR";

/// Resolve the data directory: `AGENTFLOW_DATA_DIR`, else `~/.agentflow`,
/// else `./.agentflow` when no home directory is known.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentflow")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Relative `template_dir` and `storage.path` values are resolved against `data_dir`.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return with_data_dir_defaults(EngineConfig::default(), data_dir);
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return with_data_dir_defaults(EngineConfig::default(), data_dir);
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => with_data_dir_defaults(config, data_dir),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            with_data_dir_defaults(EngineConfig::default(), data_dir)
        }
    }
}

/// Anchor relative paths at `data_dir` and default the template directory
/// to `{data_dir}/templates`.
fn with_data_dir_defaults(mut config: EngineConfig, data_dir: &Path) -> EngineConfig {
    let template_dir = config
        .template_dir
        .take()
        .unwrap_or_else(|| PathBuf::from("templates"));
    config.template_dir = Some(anchor(template_dir, data_dir));
    config.storage.path = config.storage.path.take().map(|p| anchor(p, data_dir));
    config
}

fn anchor(path: PathBuf, data_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        data_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::config::StorageBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_defaults_under_data_dir() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.state_key, "workflowEngine");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.template_dir, Some(tmp.path().join("templates")));
        assert!(config.resume_on_open);
    }

    #[tokio::test]
    async fn valid_toml_is_parsed_and_anchored() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
template_dir = "defs"
event_capacity = 64
resume_on_open = false

[storage]
backend = "json"
path = "state"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.template_dir, Some(tmp.path().join("defs")));
        assert_eq!(config.event_capacity, 64);
        assert!(!config.resume_on_open);
        assert!(config.requeue_interrupted_tasks);
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(config.storage.path, Some(tmp.path().join("state")));
    }

    #[tokio::test]
    async fn absolute_paths_are_kept() {
        let tmp = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let content = format!("template_dir = {:?}\n", elsewhere.path().display().to_string());
        tokio::fs::write(tmp.path().join("config.toml"), content)
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.template_dir, Some(elsewhere.path().to_path_buf()));
    }

    #[tokio::test]
    async fn invalid_toml_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }
}
