//! Liveness and readiness probes.

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe. Checks nothing beyond the process answering.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe: 200 if the session store answers, 503 otherwise.
///
/// Provider credentials are not checked; embedded sessions work without them.
#[tracing::instrument(skip_all, name = "mp.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = state.session_store.ping().await {
        tracing::warn!(target: "mp.handlers.health", error = %e, "Readiness check failed: session store unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                session_store: Some("unhealthy"),
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            session_store: Some("healthy"),
            error: None,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_not_ready_body_shape() {
        let body = serde_json::to_value(ReadinessResponse {
            status: "not_ready",
            session_store: Some("unhealthy"),
            error: Some("Service dependencies unavailable".to_string()),
        })
        .unwrap();

        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["session_store"], "unhealthy");
    }

    #[test]
    fn test_ready_body_skips_error() {
        let body = serde_json::to_value(ReadinessResponse {
            status: "ready",
            session_store: Some("healthy"),
            error: None,
        })
        .unwrap();

        assert!(body.get("error").is_none());
    }
}
