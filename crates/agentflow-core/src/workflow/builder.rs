//! Fluent builders for workflow and template definitions.
//!
//! ```ignore
//! let spec = WorkflowBuilder::new("nightly-digest")
//!     .context("region", "eu")
//!     .task(TaskSpec::new("fetch", "Fetch", "http"))
//!     .task(TaskSpec::new("summarize", "Summarize", "llm").depends_on("fetch"))
//!     .build()?;
//! ```

use std::collections::HashMap;

use agentflow_types::error::EngineError;
use agentflow_types::task::TaskSpec;
use agentflow_types::template::TemplateSpec;
use agentflow_types::workflow::{WorkflowSpec, default_version};
use serde_json::Value;

use super::template::normalize_task_ids;

/// Builder for [`WorkflowSpec`].
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    version: String,
    owner: Option<String>,
    context: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    tasks: Vec<TaskSpec>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: default_version(),
            owner: None,
            context: HashMap::new(),
            metadata: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Validate and produce the `WorkflowSpec`. Empty task IDs are filled in.
    pub fn build(self) -> Result<WorkflowSpec, EngineError> {
        validate_name(&self.name, "workflow")?;
        let mut tasks = self.tasks;
        normalize_task_ids(&mut tasks)?;

        Ok(WorkflowSpec {
            name: self.name,
            description: self.description,
            version: self.version,
            tasks,
            context: self.context,
            owner: self.owner,
            metadata: self.metadata,
        })
    }
}

/// Builder for [`TemplateSpec`].
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    name: String,
    description: Option<String>,
    version: String,
    author: Option<String>,
    variables: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    tasks: Vec<TaskSpec>,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: default_version(),
            author: None,
            variables: HashMap::new(),
            metadata: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Seed value copied into the context of every instantiated workflow.
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn build(self) -> Result<TemplateSpec, EngineError> {
        validate_name(&self.name, "template")?;
        let mut tasks = self.tasks;
        normalize_task_ids(&mut tasks)?;

        Ok(TemplateSpec {
            name: self.name,
            description: self.description,
            version: self.version,
            tasks,
            variables: self.variables,
            author: self.author,
            metadata: self.metadata,
        })
    }
}

fn validate_name(name: &str, kind: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(format!("{kind} name cannot be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::condition::Condition;
    use serde_json::json;

    #[test]
    fn workflow_builder_collects_everything() {
        let spec = WorkflowBuilder::new("digest")
            .description("daily digest")
            .version("2.1.0")
            .owner("ops")
            .context("region", "eu")
            .metadata("team", "data")
            .task(TaskSpec::new("fetch", "Fetch", "http").timeout_ms(5_000))
            .task(
                TaskSpec::new("summarize", "Summarize", "llm")
                    .depends_on("fetch")
                    .condition(Condition::task_success("fetch"))
                    .retries(2),
            )
            .build()
            .unwrap();

        assert_eq!(spec.version, "2.1.0");
        assert_eq!(spec.owner.as_deref(), Some("ops"));
        assert_eq!(spec.context["region"], json!("eu"));
        assert_eq!(spec.tasks.len(), 2);
        assert_eq!(spec.tasks[1].dependencies, vec!["fetch"]);
    }

    #[test]
    fn builder_defaults_version_and_fills_ids() {
        let spec = WorkflowBuilder::new("digest")
            .task(TaskSpec::new("", "Anonymous", "noop"))
            .build()
            .unwrap();
        assert_eq!(spec.version, "1.0.0");
        assert!(!spec.tasks[0].id.is_empty());
    }

    #[test]
    fn builder_rejects_duplicates_and_empty_names() {
        let dup = WorkflowBuilder::new("digest")
            .task(TaskSpec::new("a", "A", "noop"))
            .task(TaskSpec::new("a", "B", "noop"))
            .build();
        assert!(matches!(dup, Err(EngineError::Validation(_))));

        assert!(WorkflowBuilder::new("  ").build().is_err());
        assert!(TemplateBuilder::new("").build().is_err());
    }

    #[test]
    fn template_builder_sets_variables_and_author() {
        let spec = TemplateBuilder::new("onboarding")
            .author("people-team")
            .variable("welcome", true)
            .task(TaskSpec::new("email", "Send email", "email"))
            .build()
            .unwrap();
        assert_eq!(spec.author.as_deref(), Some("people-team"));
        assert_eq!(spec.variables["welcome"], json!(true));
    }
}
