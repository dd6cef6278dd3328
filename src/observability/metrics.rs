//! Prometheus metrics.
//!
//! Provides metrics for:
//! - HTTP request latency and counts
//! - Error responses by type
//! - Ingested usage events and bytes
//! - Authentication attempts

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render the exposition text, if a recorder is installed.
pub fn render() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        get_prometheus_handle().map(|h| h.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_str = status.to_string();
        let status_class = format!("{}xx", status / 100);

        counter!("sharegate_http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status_str, "status_class" => status_class.clone())
            .increment(1);

        histogram!("sharegate_http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record an error response.
///
/// `error_type` is the `type` field of the error body, e.g. `not_found`,
/// `forbidden`, `internal_error`.
pub fn record_error(error_type: &str, status: u16) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "sharegate_errors_total",
            "error_type" => error_type.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (error_type, status);
    }
}

/// Record an accepted audit callback.
pub fn record_ingested_event(service_type: &str, model: &str, byte_length: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "sharegate_usage_events_total",
            "service_type" => service_type.to_string(),
            "model" => model.to_string()
        )
        .increment(1);

        counter!(
            "sharegate_usage_bytes_total",
            "service_type" => service_type.to_string()
        )
        .increment(byte_length);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (service_type, model, byte_length);
    }
}

/// Record authentication result.
///
/// `method` is `access_token` for dashboard calls and `instance_token` for
/// audit callbacks.
pub fn record_auth_attempt(method: &str, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "failure" };
        counter!("sharegate_auth_attempts_total", "method" => method.to_string(), "status" => status.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, success);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
