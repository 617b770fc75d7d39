//! Observability setup for Parley: tracing subscriber installation and
//! optional OpenTelemetry export.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, init_tracing, shutdown_tracing};
