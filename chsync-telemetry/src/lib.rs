//! Logging and metrics exporters for sync workers.

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, init_test_tracing, init_tracing};
