//! Meeting Provisioner
//!
//! Entry point for the tutoring platform's meeting provisioning service.

use anyhow::Context;
use common::token_manager::{TokenManager, TokenManagerConfig, TokenRefreshEvent};
use meeting_provisioner::config::Config;
use meeting_provisioner::observability::metrics;
use meeting_provisioner::repositories::{InMemorySessionStore, PgSessionStore, SessionStore};
use meeting_provisioner::routes::{self, AppState};
use meeting_provisioner::services::{MeetingProvider, MeetingProviderClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meeting_provisioner=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Meeting Provisioner");

    let config = Config::from_env()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))
        .context("loading configuration")?;

    info!(
        bind_address = %config.bind_address,
        provider_api_url = %config.provider_api_url,
        provider_configured = config.has_provider_credentials(),
        "Configuration loaded successfully"
    );
    if !config.has_provider_credentials() {
        warn!("Provider credentials not set; external meetings will fail with a configuration error");
    }

    let metrics_handle = metrics::init_metrics_recorder()
        .map_err(|e| anyhow::anyhow!(e))
        .context("initializing metrics")?;

    let token_manager = TokenManager::new(
        TokenManagerConfig::new(config.provider_auth_url.clone())
            .with_credentials(
                config.provider_account_id.clone(),
                config.provider_client_id.clone(),
                config.provider_client_secret.clone(),
            )
            .with_safety_buffer(config.token_safety_buffer())
            .with_http_timeout(config.provider_timeout())
            .with_on_refresh(Arc::new(|event: TokenRefreshEvent| {
                let status = if event.success { "success" } else { "error" };
                metrics::record_token_refresh(status, event.error_category, event.duration);
            })),
    )
    .context("building token manager")?;

    let provider: Arc<dyn MeetingProvider> = Arc::new(
        MeetingProviderClient::new(
            config.provider_api_url.clone(),
            Arc::new(token_manager),
            config.provider_timeout(),
            config.default_meeting_timezone.clone(),
        )
        .context("building provider client")?,
    );

    let session_store: Arc<dyn SessionStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&add_query_timeout(database_url, 5))
                .await
                .inspect_err(|e| error!("Failed to connect to database: {}", e))
                .context("connecting to database")?;
            info!("Database connection established");
            Arc::new(PgSessionStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory session store (development only)");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let bind_address = config.bind_address.clone();
    let drain = Duration::from_secs(config.drain_seconds);

    let state = Arc::new(AppState::new(config, session_store, provider));
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address
        .parse()
        .inspect_err(|e| error!("Invalid bind address: {}", e))
        .context("parsing bind address")?;

    info!("Meeting Provisioner listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain))
    .await?;

    info!("Meeting Provisioner shutdown complete");
    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives and the drain period has passed.
async fn shutdown_signal(drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain.is_zero() {
        info!("Skipping drain period (MP_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    }
}

/// Append a server-side statement timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
