//! Prometheus recorder for metrics emitted through the `metrics` facade,
//! such as the per-request counters of the HTTP middleware.

use crate::error::AppError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the global recorder. Later calls return the first call's result.
pub fn install_metrics_recorder() -> Result<(), AppError> {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map(|_| ())
        .map_err(|e| {
            AppError::InternalError(anyhow::anyhow!(
                "failed to install Prometheus recorder: {}",
                e
            ))
        })
}

/// Recorded metrics in Prometheus text format; empty before installation.
pub fn render_metrics() -> String {
    match METRICS_HANDLE.get() {
        Some(Ok(handle)) => handle.render(),
        _ => String::new(),
    }
}
