//! Reelcast Infrastructure Library
//!
//! Process-level setup shared by the worker and the admin CLI.

pub mod telemetry;

pub use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
