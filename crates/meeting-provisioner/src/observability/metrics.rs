//! Metrics definitions for the Meeting Provisioner.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mp_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: 7 values max
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `operation`: create, get, update, delete
//! - `status`: success, error, timeout (plus `conflict` for binds)
//! - `provider`: embedded, external

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("mp_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Provider calls are remote; buckets reach the 10s default timeout
        .set_buckets_for_metric(
            Matcher::Prefix("mp_provider_request".to_string()),
            &[
                0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set provider request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("mp_token_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set token refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `mp_http_requests_total`, `mp_http_request_duration_seconds`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("mp_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("mp_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace meeting and session ids with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/api/v1/meetings" => return path.to_string(),
        _ => {}
    }

    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["", "api", "v1", "meetings", _] => "/api/v1/meetings/{id}".to_string(),
        ["", "api", "v1", "sessions", _, "meeting"] => {
            "/api/v1/sessions/{id}/meeting".to_string()
        }
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Provider Metrics
// ============================================================================

/// Record one provider API call (after retries).
///
/// Metric: `mp_provider_requests_total`, `mp_provider_request_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_provider_request(operation: &str, status: &str, duration: Duration) {
    histogram!("mp_provider_request_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("mp_provider_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a provider token exchange.
///
/// Metric: `mp_token_refresh_total`, `mp_token_refresh_duration_seconds`
/// Labels: `status`, `error_type`
pub fn record_token_refresh(status: &str, error_type: Option<&str>, duration: Duration) {
    histogram!("mp_token_refresh_duration_seconds").record(duration.as_secs_f64());

    counter!("mp_token_refresh_total",
        "status" => status.to_string(),
        "error_type" => error_type.unwrap_or("none").to_string()
    )
    .increment(1);
}

// ============================================================================
// Binding Metrics
// ============================================================================

/// Record a session bind attempt.
///
/// Metric: `mp_session_binds_total`
pub fn record_session_bind(status: &str, provider: &str) {
    counter!("mp_session_binds_total",
        "status" => status.to_string(),
        "provider" => provider.to_string()
    )
    .increment(1);
}

/// Record a remote meeting that has no local binding.
///
/// Metric: `mp_binding_divergence_total`
pub fn record_binding_divergence(provider: &str) {
    counter!("mp_binding_divergence_total",
        "provider" => provider.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder goes to the no-op recorder.

    #[test]
    fn test_record_functions_do_not_panic() {
        record_http_request("GET", "/health", 200, Duration::from_millis(2));
        record_http_request("POST", "/api/v1/sessions/abc/meeting", 502, Duration::from_secs(1));
        record_provider_request("create", "success", Duration::from_millis(300));
        record_provider_request("delete", "error", Duration::from_millis(30));
        record_token_refresh("success", None, Duration::from_millis(120));
        record_token_refresh("error", Some("auth_rejected"), Duration::from_millis(80));
        record_session_bind("success", "external");
        record_session_bind("conflict", "embedded");
        record_binding_divergence("external");
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(502), "error");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/api/v1/meetings"), "/api/v1/meetings");
        assert_eq!(
            normalize_endpoint("/api/v1/meetings/85746065432"),
            "/api/v1/meetings/{id}"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/sessions/6f1c0c4e-0000-4000-8000-000000000001/meeting"),
            "/api/v1/sessions/{id}/meeting"
        );
        assert_eq!(normalize_endpoint("/api/v1/sessions/1"), "/other");
        assert_eq!(normalize_endpoint("/wp-admin"), "/other");
    }
}
