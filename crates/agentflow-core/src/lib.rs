//! Workflow orchestration engine and storage trait definitions for agentflow.
//!
//! This crate defines the "ports" (the `StateStore` trait) that the
//! infrastructure layer implements, plus the engine itself. It depends only
//! on `agentflow-types` -- never on `agentflow-infra` or any database crate.

pub mod event;
pub mod storage;
pub mod workflow;
