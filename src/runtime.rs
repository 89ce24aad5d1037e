//! Process-level concerns: validated configuration, tracing and metrics,
//! and the runner that wires the engine together.

pub mod config;
pub mod runner;
pub mod telemetry;

pub use config::{SyncConfig, SyncConfigBuilder, SyncConfigParams};
pub use runner::Runner;
pub use telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
