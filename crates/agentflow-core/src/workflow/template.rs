//! Template store: reusable workflow definitions, mirrored to disk.
//!
//! The in-memory map is authoritative. When a template directory is
//! configured, each template is also written to `<id>.json` and the
//! directory is scanned once on load. Disk failures are logged and never
//! surfaced to callers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use agentflow_types::error::EngineError;
use agentflow_types::event::WorkflowEvent;
use agentflow_types::task::TaskSpec;
use agentflow_types::template::{Template, TemplatePatch, TemplateSpec};
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::event::EventBus;

// ---------------------------------------------------------------------------
// Task ID normalization
// ---------------------------------------------------------------------------

/// Give every task with an empty ID a fresh one and reject duplicates.
pub(crate) fn normalize_task_ids(tasks: &mut [TaskSpec]) -> Result<(), EngineError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks.iter_mut() {
        if task.id.trim().is_empty() {
            task.id = Uuid::now_v7().to_string();
        }
        if !seen.insert(task.id.clone()) {
            return Err(EngineError::Validation(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Document parsing
// ---------------------------------------------------------------------------

/// On-disk / import format of a template document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Json,
    Yaml,
}

impl TemplateFormat {
    /// Infer the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

/// Parse a template definition document (JSON or YAML).
pub fn parse_template_document(
    content: &str,
    format: TemplateFormat,
) -> Result<TemplateSpec, EngineError> {
    let spec: TemplateSpec = match format {
        TemplateFormat::Json => serde_json::from_str(content)
            .map_err(|e| EngineError::Validation(format!("invalid template JSON: {e}")))?,
        TemplateFormat::Yaml => serde_yaml_ng::from_str(content)
            .map_err(|e| EngineError::Validation(format!("invalid template YAML: {e}")))?,
    };

    if spec.name.trim().is_empty() {
        return Err(EngineError::Validation(
            "template name cannot be empty".to_string(),
        ));
    }
    Ok(spec)
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

pub struct TemplateStore {
    templates: DashMap<Uuid, Template>,
    dir: Option<PathBuf>,
    event_bus: EventBus,
}

impl TemplateStore {
    pub fn new(dir: Option<PathBuf>, event_bus: EventBus) -> Self {
        Self {
            templates: DashMap::new(),
            dir,
            event_bus,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Load every `*.json` template in the configured directory.
    ///
    /// A missing directory is created. Unreadable or malformed files are
    /// logged and skipped. Returns the number of templates loaded.
    pub async fn load(&self) -> usize {
        let Some(dir) = &self.dir else {
            return 0;
        };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to create template directory");
            return 0;
        }

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to read template directory");
                return 0;
            }
        };

        let mut loaded = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "error while scanning template directory");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match read_template_file(&path).await {
                Ok(template) => {
                    tracing::debug!(template_id = %template.id, name = template.name.as_str(), "loaded template");
                    self.templates.insert(template.id, template);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = e.as_str(), "skipping unreadable template file");
                }
            }
        }

        tracing::info!(dir = %dir.display(), loaded, "template directory loaded");
        loaded
    }

    pub async fn create(&self, spec: TemplateSpec) -> Result<Template, EngineError> {
        if spec.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "template name cannot be empty".to_string(),
            ));
        }

        let mut tasks = spec.tasks;
        normalize_task_ids(&mut tasks)?;

        let template = Template {
            id: Uuid::now_v7(),
            name: spec.name,
            description: spec.description,
            version: spec.version,
            tasks,
            variables: spec.variables,
            author: spec.author,
            created_at: Utc::now(),
            updated_at: None,
            metadata: spec.metadata,
        };

        self.templates.insert(template.id, template.clone());
        self.write_file(&template).await;

        tracing::info!(template_id = %template.id, name = template.name.as_str(), "template created");
        self.event_bus.publish(WorkflowEvent::TemplateCreated {
            template_id: template.id,
        });
        Ok(template)
    }

    pub fn get(&self, id: &Uuid) -> Option<Template> {
        self.templates.get(id).map(|t| t.value().clone())
    }

    /// Earliest-created template with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<Template> {
        self.templates
            .iter()
            .filter(|t| t.name == name)
            .map(|t| t.value().clone())
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
    }

    /// Look up by UUID first, then by name.
    pub fn resolve(&self, id_or_name: &str) -> Option<Template> {
        Uuid::parse_str(id_or_name)
            .ok()
            .and_then(|id| self.get(&id))
            .or_else(|| self.find_by_name(id_or_name))
    }

    pub fn list(&self) -> Vec<Template> {
        let mut templates: Vec<Template> =
            self.templates.iter().map(|t| t.value().clone()).collect();
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Patch a template.
    ///
    /// A patch that changes `version` leaves the original untouched and
    /// creates a new record with a fresh ID.
    pub async fn update(&self, id: &Uuid, mut patch: TemplatePatch) -> Result<Template, EngineError> {
        let current = self
            .get(id)
            .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))?;

        if let Some(tasks) = patch.tasks.as_mut() {
            normalize_task_ids(tasks)?;
        }

        let now = Utc::now();
        if patch.changes_version(&current) {
            let mut versioned = current;
            patch.apply_to(&mut versioned);
            versioned.id = Uuid::now_v7();
            versioned.created_at = now;
            versioned.updated_at = Some(now);

            self.templates.insert(versioned.id, versioned.clone());
            self.write_file(&versioned).await;

            tracing::info!(
                original_template_id = %id,
                new_template_id = %versioned.id,
                version = versioned.version.as_str(),
                "template versioned"
            );
            self.event_bus.publish(WorkflowEvent::TemplateVersioned {
                original_template_id: *id,
                new_template_id: versioned.id,
            });
            return Ok(versioned);
        }

        let updated = self
            .templates
            .get_mut(id)
            .map(|mut entry| {
                let template = entry.value_mut();
                patch.apply_to(template);
                template.updated_at = Some(now);
                template.clone()
            })
            .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))?;

        self.write_file(&updated).await;
        tracing::info!(template_id = %id, "template updated");
        self.event_bus
            .publish(WorkflowEvent::TemplateUpdated { template_id: *id });
        Ok(updated)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool, EngineError> {
        if self.templates.remove(id).is_none() {
            return Err(EngineError::TemplateNotFound(id.to_string()));
        }

        if let Some(path) = self.file_path(id) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove template file");
                }
            }
        }

        tracing::info!(template_id = %id, "template deleted");
        self.event_bus
            .publish(WorkflowEvent::TemplateDeleted { template_id: *id });
        Ok(true)
    }

    fn file_path(&self, id: &Uuid) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{id}.json")))
    }

    async fn write_file(&self, template: &Template) {
        let Some(path) = self.file_path(&template.id) else {
            return;
        };

        let content = match serde_json::to_string_pretty(template) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(template_id = %template.id, error = %e, "failed to serialize template");
                return;
            }
        };

        if let Err(e) = tokio::fs::write(&path, content).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write template file");
        }
    }
}

async fn read_template_file(path: &Path) -> Result<Template, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn spec(name: &str) -> TemplateSpec {
        TemplateSpec {
            name: name.to_string(),
            description: Some("test template".to_string()),
            version: "1.0.0".to_string(),
            tasks: vec![
                TaskSpec::new("fetch", "Fetch", "http"),
                TaskSpec::new("", "Summarize", "llm").depends_on("fetch"),
            ],
            variables: [("region".to_string(), json!("eu"))].into(),
            author: Some("ops".to_string()),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_emits_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let store = TemplateStore::new(None, bus);

        let template = store.create(spec("digest")).await.unwrap();
        assert_eq!(template.tasks[0].id, "fetch");
        assert!(!template.tasks[1].id.is_empty());
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkflowEvent::TemplateCreated {
                template_id: template.id
            }
        );
    }

    #[tokio::test]
    async fn create_rejects_duplicate_task_ids() {
        let store = TemplateStore::new(None, EventBus::new(4));
        let mut dup = spec("dup");
        dup.tasks = vec![
            TaskSpec::new("a", "A", "noop"),
            TaskSpec::new("a", "Again", "noop"),
        ];
        let err = store.create(dup).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn resolve_by_id_then_name() {
        let store = TemplateStore::new(None, EventBus::new(4));
        let first = store.create(spec("digest")).await.unwrap();
        let _second = store.create(spec("digest")).await.unwrap();

        assert_eq!(store.resolve(&first.id.to_string()).unwrap().id, first.id);
        assert_eq!(store.resolve("digest").unwrap().id, first.id);
        assert!(store.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn update_in_place_keeps_id() {
        let bus = EventBus::new(16);
        let store = TemplateStore::new(None, bus.clone());
        let template = store.create(spec("digest")).await.unwrap();
        let mut rx = bus.subscribe();

        let patch = TemplatePatch {
            description: Some("renamed".to_string()),
            ..Default::default()
        };
        let updated = store.update(&template.id, patch).await.unwrap();

        assert_eq!(updated.id, template.id);
        assert_eq!(updated.description.as_deref(), Some("renamed"));
        assert!(updated.updated_at.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkflowEvent::TemplateUpdated {
                template_id: template.id
            }
        );
    }

    #[tokio::test]
    async fn version_change_creates_new_record() {
        let bus = EventBus::new(16);
        let store = TemplateStore::new(None, bus.clone());
        let original = store.create(spec("digest")).await.unwrap();
        let mut rx = bus.subscribe();

        let patch = TemplatePatch {
            version: Some("2.0.0".to_string()),
            ..Default::default()
        };
        let versioned = store.update(&original.id, patch).await.unwrap();

        assert_ne!(versioned.id, original.id);
        assert_eq!(versioned.version, "2.0.0");
        assert_eq!(store.get(&original.id).unwrap().version, "1.0.0");
        assert_eq!(store.len(), 2);
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkflowEvent::TemplateVersioned {
                original_template_id: original.id,
                new_template_id: versioned.id,
            }
        );
    }

    #[tokio::test]
    async fn same_version_patch_is_in_place() {
        let store = TemplateStore::new(None, EventBus::new(4));
        let original = store.create(spec("digest")).await.unwrap();
        let patch = TemplatePatch {
            version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        let updated = store.update(&original.id, patch).await.unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = TemplateStore::new(None, EventBus::new(4));
        let id = Uuid::now_v7();
        assert!(store.update(&id, TemplatePatch::default()).await.unwrap_err().is_not_found());
        assert!(store.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn disk_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let template_dir = dir.path().join("templates");

        let store = TemplateStore::new(Some(template_dir.clone()), EventBus::new(4));
        assert_eq!(store.load().await, 0);
        assert!(template_dir.is_dir());

        let template = store.create(spec("digest")).await.unwrap();
        let file = template_dir.join(format!("{}.json", template.id));
        assert!(file.exists());

        // Junk files are skipped
        std::fs::write(template_dir.join("broken.json"), "{ not json").unwrap();
        std::fs::write(template_dir.join("notes.txt"), "ignored").unwrap();

        let reloaded = TemplateStore::new(Some(template_dir.clone()), EventBus::new(4));
        assert_eq!(reloaded.load().await, 1);
        assert_eq!(reloaded.get(&template.id).unwrap(), template);

        assert!(reloaded.delete(&template.id).await.unwrap());
        assert!(!file.exists());
    }

    #[test]
    fn parse_json_and_yaml_documents() {
        let json_doc = r#"{"name": "digest", "tasks": [{"id": "a", "name": "A", "action": "noop"}]}"#;
        let parsed = parse_template_document(json_doc, TemplateFormat::Json).unwrap();
        assert_eq!(parsed.name, "digest");
        assert_eq!(parsed.version, "1.0.0");

        let yaml_doc = "name: digest\ntasks:\n  - id: a\n    name: A\n    action: noop\n    dependencies: []\n";
        let parsed = parse_template_document(yaml_doc, TemplateFormat::Yaml).unwrap();
        assert_eq!(parsed.tasks[0].action, "noop");

        assert!(parse_template_document("name: ''", TemplateFormat::Yaml).is_err());
        assert_eq!(
            TemplateFormat::from_path(Path::new("x.yml")),
            TemplateFormat::Yaml
        );
    }
}
