//! Infrastructure layer for agentflow.
//!
//! Contains implementations of the `StateStore` trait defined in
//! `agentflow-core` (in-memory, JSON files, SQLite) and the config loader.

pub mod config;
pub mod sqlite;
pub mod storage;
