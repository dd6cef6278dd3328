//! Observability: structured logging and Prometheus metrics.
//!
//! Logging goes through `tracing` with a configurable output format. Metrics
//! are recorded through free functions in [`metrics`] that compile to no-ops
//! without the `prometheus` feature.

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;
