//! Prometheus scrape endpoint.
//!
//! Unauthenticated. Labels are bounded; no meeting or session ids appear.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// `GET /metrics`
#[tracing::instrument(skip_all, name = "mp.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
