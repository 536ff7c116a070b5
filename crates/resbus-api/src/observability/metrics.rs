//! Prometheus metrics infrastructure.
//!
//! # Metrics Exposed
//!
//! - `resbus_http_requests_total` - Total HTTP requests by method and status
//! - `resbus_http_request_duration_seconds` - Request duration histogram

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Shared state containing the Prometheus handle for metrics rendering.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    /// Creates a new metrics state with the given Prometheus handle.
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Initializes the Prometheus metrics recorder.
///
/// Must be called once at application startup before any metrics are
/// recorded.
///
/// # Errors
///
/// Returns an error if the recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    metrics::describe_counter!("resbus_http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "resbus_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    Ok(MetricsState::new(handle))
}

/// Prometheus exposition format content type.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], state.render())
}
