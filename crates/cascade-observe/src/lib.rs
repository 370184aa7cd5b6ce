//! Observability bootstrap for cascade binaries and test harnesses.

pub mod tracing_setup;
