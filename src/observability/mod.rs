//! # Observability Module
//!
//! Logging and metrics setup for the gateway binary.

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::init_metrics;
