//! Test server harness.
//!
//! Spawns the real Meeting Provisioner router on `127.0.0.1:0` with an
//! in-memory session store. The provider is either [`MockMeetingProvider`]
//! or a real [`MeetingProviderClient`] pointed at a local stub (wiremock).

use crate::fixtures::{mint_token, TEST_JWT_SECRET};
use common::token_manager::{TokenManager, TokenManagerConfig};
use meeting_provisioner::config::Config;
use meeting_provisioner::models::Session;
use meeting_provisioner::repositories::InMemorySessionStore;
use meeting_provisioner::routes::{self, AppState};
use meeting_provisioner::services::provider_client::mock::MockMeetingProvider;
use meeting_provisioner::services::{MeetingProvider, MeetingProviderClient};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running Meeting Provisioner for integration tests.
pub struct TestServer {
    addr: SocketAddr,
    config: Config,
    store: Arc<InMemorySessionStore>,
    mock: Option<Arc<MockMeetingProvider>>,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Spawn with a succeeding mock provider.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_mock(MockMeetingProvider::new()).await
    }

    /// Spawn with the given mock provider.
    pub async fn spawn_with_mock(mock: MockMeetingProvider) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&base_vars())
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;
        let mock = Arc::new(mock);
        Self::start(config, mock.clone(), Some(mock)).await
    }

    /// Spawn with the real provider client.
    ///
    /// `auth_url` serves `/oauth/token`; `api_url` serves the meeting API.
    /// Credentials are set, so the token exchange is attempted on first use.
    pub async fn spawn_with_provider(auth_url: &str, api_url: &str) -> Result<Self, anyhow::Error> {
        let mut vars = provider_vars(auth_url, api_url);
        vars.extend([
            ("PROVIDER_ACCOUNT_ID".to_string(), "test-account".to_string()),
            ("PROVIDER_CLIENT_ID".to_string(), "test-client".to_string()),
            ("PROVIDER_CLIENT_SECRET".to_string(), "test-client-secret".to_string()),
        ]);
        Self::spawn_real(&vars).await
    }

    /// Spawn with the real provider client but no provider credentials.
    pub async fn spawn_without_credentials(provider_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_real(&provider_vars(provider_url, provider_url)).await
    }

    async fn spawn_real(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let token_manager = TokenManager::new(
            TokenManagerConfig::new(config.provider_auth_url.clone())
                .with_credentials(
                    config.provider_account_id.clone(),
                    config.provider_client_id.clone(),
                    config.provider_client_secret.clone(),
                )
                .with_http_timeout(config.provider_timeout()),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create token manager: {}", e))?;

        let client = MeetingProviderClient::new(
            config.provider_api_url.clone(),
            Arc::new(token_manager),
            config.provider_timeout(),
            config.default_meeting_timezone.clone(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create provider client: {}", e))?;

        Self::start(config, Arc::new(client), None).await
    }

    async fn start(
        config: Config,
        provider: Arc<dyn MeetingProvider>,
        mock: Option<Arc<MockMeetingProvider>>,
    ) -> Result<Self, anyhow::Error> {
        let store = Arc::new(InMemorySessionStore::new());
        let state = Arc::new(AppState::new(config.clone(), store.clone(), provider));

        // Not installed globally: several servers may run in one test binary
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            store,
            mock,
            _handle: handle,
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session store shared with the server.
    pub fn store(&self) -> &Arc<InMemorySessionStore> {
        &self.store
    }

    /// Seed a session, standing in for the application that owns sessions.
    pub async fn insert_session(&self, session: Session) {
        self.store.insert(session).await;
    }

    /// The mock provider. Panics if the server uses the real client.
    pub fn mock(&self) -> &MockMeetingProvider {
        self.mock
            .as_deref()
            .expect("server was spawned with the real provider client")
    }

    /// A valid caller token.
    pub fn token(&self) -> String {
        mint_token("test-tutor", &["tutor"])
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

fn provider_vars(auth_url: &str, api_url: &str) -> HashMap<String, String> {
    let mut vars = base_vars();
    vars.extend([
        ("PROVIDER_AUTH_URL".to_string(), auth_url.to_string()),
        ("PROVIDER_API_URL".to_string(), api_url.to_string()),
        ("PROVIDER_TIMEOUT_SECONDS".to_string(), "2".to_string()),
    ]);
    vars
}

fn base_vars() -> HashMap<String, String> {
    HashMap::from([
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("AUTH_JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
        (
            "EMBEDDED_ROOM_BASE_URL".to_string(),
            "https://meet.test".to_string(),
        ),
        ("MP_DRAIN_SECONDS".to_string(), "0".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_and_answers_health() -> Result<(), anyhow::Error> {
        let server = TestServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().port() > 0);

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");
        Ok(())
    }

    #[tokio::test]
    async fn test_ready_with_in_memory_store() -> Result<(), anyhow::Error> {
        let server = TestServer::spawn().await?;

        let response = reqwest::get(format!("{}/ready", server.url())).await?;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["status"], "ready");
        Ok(())
    }

    #[tokio::test]
    async fn test_config_uses_test_secret() -> Result<(), anyhow::Error> {
        let server = TestServer::spawn().await?;
        assert_eq!(server.config().embedded_room_base_url, "https://meet.test");
        assert!(!server.config().has_provider_credentials());
        Ok(())
    }
}
