//! HTTP routes for the Meeting Provisioner.
//!
//! Defines the Axum router and application state.

use crate::auth::JwtValidator;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::repositories::SessionStore;
use crate::services::{MeetingProvider, ProviderSelector, SessionMeetingBinder};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Session binding storage.
    pub session_store: Arc<dyn SessionStore>,

    /// External provider used directly by the meeting CRUD routes.
    pub provider: Arc<dyn MeetingProvider>,

    pub binder: Arc<SessionMeetingBinder>,
}

impl AppState {
    /// Wire the binder and provider selector over `session_store` and `provider`.
    pub fn new(
        config: Config,
        session_store: Arc<dyn SessionStore>,
        provider: Arc<dyn MeetingProvider>,
    ) -> Self {
        let selector = ProviderSelector::new(config.embedded_room_base_url.clone(), provider.clone());
        let binder = Arc::new(SessionMeetingBinder::new(session_store.clone(), selector));

        Self {
            config,
            session_store,
            provider,
            binder,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public
/// - `/api/v1/meetings` and `/api/v1/meetings/:id` - meeting CRUD (authenticated)
/// - `/api/v1/sessions/:id/meeting` - bind/unbind (authenticated)
/// - TraceLayer, 30 second timeout, HTTP metrics (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let jwt_validator = Arc::new(JwtValidator::new(
        &state.config.auth_jwt_secret,
        state.config.jwt_clock_skew_seconds,
    ));
    let auth_state = Arc::new(AuthState { jwt_validator });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/v1/meetings", post(handlers::create_meeting))
        .route(
            "/api/v1/meetings/:id",
            get(handlers::get_meeting)
                .patch(handlers::update_meeting)
                .delete(handlers::delete_meeting),
        )
        .route(
            "/api/v1/sessions/:id/meeting",
            post(handlers::bind_session_meeting).delete(handlers::unbind_session_meeting),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
