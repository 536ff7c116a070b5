//! Observability infrastructure for resbus.
//!
//! This module provides:
//! - Structured logging configuration
//! - Prometheus metrics endpoint

mod logging;
mod metrics;

pub use logging::{init_logging, parse_log_level, LoggingConfig};
pub use metrics::{init_metrics, metrics_handler, MetricsError, MetricsState};
