//! Shared domain types for agentflow.
//!
//! This crate contains the types shared by every layer of the engine:
//! tasks, conditions, workflows, templates, events, configuration, and
//! the error types that cross crate boundaries.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod task;
pub mod template;
pub mod workflow;
