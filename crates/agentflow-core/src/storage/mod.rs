//! Storage abstractions for agentflow.
//!
//! Defines the key-value `StateStore` the engine snapshots into.
//! Implementations live in agentflow-infra.

pub mod state_store;

pub use state_store::StateStore;
