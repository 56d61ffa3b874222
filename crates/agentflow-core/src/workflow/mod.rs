//! Workflow orchestration: templates, conditions, scheduling and lifecycle.
//!
//! - `template`: template store mirrored to a JSON directory
//! - `condition` / `expression`: task gating
//! - `dag`: dependency analysis and execution waves
//! - `registry`: action name -> executor
//! - `repository`: in-memory workflow registry with snapshot persistence
//! - `scheduler`: per-workflow drivers
//! - `engine`: public handle tying it all together

pub mod builder;
pub mod condition;
pub mod dag;
pub mod engine;
pub mod expression;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod template;

pub use builder::{TemplateBuilder, WorkflowBuilder};
pub use engine::WorkflowEngine;
pub use registry::{BoxTaskExecutor, ExecutorRegistry, TaskExecutor};
pub use scheduler::TaskFailure;
