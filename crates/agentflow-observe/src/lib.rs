//! Observability for agentflow: tracing subscriber setup and optional
//! OpenTelemetry span export.

pub mod tracing_setup;

pub use tracing_setup::{TracingConfig, init_tracing, shutdown_tracing};
