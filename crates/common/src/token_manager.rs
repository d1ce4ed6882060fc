//! OAuth 2.0 Account-Credentials Token Manager.
//!
//! Acquires and caches the bearer token used against the external meeting
//! provider API. One instance is constructed per process and shared through
//! `Arc`; nothing here is a global.
//!
//! # Behavior
//!
//! - Lazy: no request is made until the first [`TokenManager::get_token`].
//! - A cached token is handed out while `now < expires_at`, where
//!   `expires_at = acquired_at + expires_in - safety_buffer`.
//! - Single-flight refresh: concurrent callers that find no usable token
//!   queue on one refresh lock; the first performs the exchange and the
//!   rest receive its outcome, success or error, without exchanging again.
//! - [`TokenManager::invalidate`] drops the cached token after the provider
//!   rejects it with 401, unless a newer token has already replaced it.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::token_manager::{TokenManager, TokenManagerConfig};
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let config = TokenManagerConfig::new("https://zoom.us".to_string()).with_credentials(
//!     Some("acct-123".to_string()),
//!     Some("client-abc".to_string()),
//!     Some(SecretString::from("secret")),
//! );
//! let manager = std::sync::Arc::new(TokenManager::new(config)?);
//!
//! let token = manager.get_token().await?;
//! let header = format!("Bearer {}", token.expose_secret());
//! ```
//!
//! # Security
//!
//! - Client secret and tokens are held as `SecretString` (never logged)
//! - Rejection bodies are logged at trace level only
//! - Every exchange carries connect and request timeouts

use crate::secret::{ExposeSecret, SecretString};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default safety buffer subtracted from the provider's `expires_in` (5 minutes).
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(300);

/// Default HTTP request timeout for the token exchange.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for the token exchange.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Grant type the provider uses for server-to-server apps.
const GRANT_TYPE: &str = "account_credentials";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token management.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// Required credentials are missing or the HTTP client cannot be built.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider rejected the credential exchange (400, 401, 403).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Transport failure, timeout, or provider 5xx.
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Token response could not be parsed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Refresh Events
// =============================================================================

/// Outcome of one credential exchange, reported to [`TokenRefreshCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRefreshEvent {
    /// Whether the exchange produced a token.
    pub success: bool,
    /// Bounded error category on failure (`configuration`, `auth_rejected`, `http`, `invalid_response`).
    pub error_category: Option<&'static str>,
    /// Wall time spent in the exchange.
    pub duration: Duration,
}

/// Hook invoked after every credential exchange attempt.
///
/// Services use it to record refresh metrics without this crate depending
/// on a metrics backend.
pub type TokenRefreshCallback = Arc<dyn Fn(TokenRefreshEvent) + Send + Sync>;

impl TokenError {
    /// Bounded label for this error, suitable for metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            TokenError::Configuration(_) => "configuration",
            TokenError::AuthenticationRejected(_) => "auth_rejected",
            TokenError::HttpError(_) => "http",
            TokenError::InvalidResponse(_) => "invalid_response",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the token manager.
///
/// Credentials are optional so that a process can start without them
/// (embedded conferencing needs none); their absence surfaces as
/// [`TokenError::Configuration`] on the first token request.
#[derive(Clone)]
pub struct TokenManagerConfig {
    /// Provider auth host (e.g. `https://zoom.us`); `/oauth/token` is appended.
    pub auth_base_url: String,

    /// Provider account id, sent as the `account_id` grant parameter.
    pub account_id: Option<String>,

    /// OAuth client id (HTTP Basic username).
    pub client_id: Option<String>,

    /// OAuth client secret (HTTP Basic password).
    pub client_secret: Option<SecretString>,

    /// Subtracted from `expires_in` when computing the cache deadline.
    pub safety_buffer: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,

    /// Optional observer for refresh outcomes.
    pub on_refresh: Option<TokenRefreshCallback>,
}

impl std::fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("auth_base_url", &self.auth_base_url)
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("safety_buffer", &self.safety_buffer)
            .field("http_timeout", &self.http_timeout)
            .field("on_refresh", &self.on_refresh.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl TokenManagerConfig {
    /// Create a configuration without credentials and with default timeouts.
    #[must_use]
    pub fn new(auth_base_url: String) -> Self {
        Self {
            auth_base_url,
            account_id: None,
            client_id: None,
            client_secret: None,
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            on_refresh: None,
        }
    }

    /// Set the account credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        account_id: Option<String>,
        client_id: Option<String>,
        client_secret: Option<SecretString>,
    ) -> Self {
        self.account_id = account_id;
        self.client_id = client_id;
        self.client_secret = client_secret;
        self
    }

    /// Set the safety buffer.
    #[must_use]
    pub fn with_safety_buffer(mut self, buffer: Duration) -> Self {
        self.safety_buffer = buffer;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Register a callback for refresh outcomes.
    #[must_use]
    pub fn with_on_refresh(mut self, callback: TokenRefreshCallback) -> Self {
        self.on_refresh = Some(callback);
        self
    }

    /// Borrow all three credentials, or name the first one missing.
    fn credentials(&self) -> Result<(&str, &str, &SecretString), TokenError> {
        let account_id = non_empty(self.account_id.as_deref())
            .ok_or_else(|| missing("PROVIDER_ACCOUNT_ID"))?;
        let client_id =
            non_empty(self.client_id.as_deref()).ok_or_else(|| missing("PROVIDER_CLIENT_ID"))?;
        let client_secret = self
            .client_secret
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| missing("PROVIDER_CLIENT_SECRET"))?;
        Ok((account_id, client_id, client_secret))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn missing(name: &str) -> TokenError {
    TokenError::Configuration(format!("{name} is not configured"))
}

// =============================================================================
// OAuth Response Types
// =============================================================================

/// Token endpoint response.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A cached bearer token. Replaced wholesale on refresh.
struct Credential {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Credential {
    fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// =============================================================================
// Token Manager
// =============================================================================

/// Process-wide provider token cache with single-flight refresh.
pub struct TokenManager {
    config: TokenManagerConfig,
    http_client: reqwest::Client,
    cache: RwLock<Option<Credential>>,
    /// Outcome of the most recent exchange, handed to callers that queued behind it.
    refresh_lock: Mutex<Option<Result<SecretString, TokenError>>>,
    /// Bumped under `refresh_lock` each time an exchange completes.
    refresh_generation: AtomicU64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a token manager. No network traffic happens here.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: TokenManagerConfig) -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
        })
    }

    /// Return a usable bearer token, exchanging credentials if needed.
    ///
    /// # Errors
    ///
    /// - `TokenError::Configuration` - credentials absent
    /// - `TokenError::AuthenticationRejected` - provider refused the exchange
    /// - `TokenError::HttpError` / `TokenError::InvalidResponse` - transport or parse failure
    pub async fn get_token(&self) -> Result<SecretString, TokenError> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        if let Some(token) = self.cached_token().await {
            trace!(target: "common.token_manager", "Token cache hit");
            return Ok(token);
        }

        let mut last_outcome = self.refresh_lock.lock().await;

        // An exchange finished while we waited: share its outcome.
        if self.refresh_generation.load(Ordering::Acquire) != observed {
            if let Some(outcome) = last_outcome.as_ref() {
                trace!(target: "common.token_manager", "Reusing concurrent refresh outcome");
                return outcome.clone();
            }
        }
        if let Some(token) = self.cached_token().await {
            trace!(target: "common.token_manager", "Token refreshed by concurrent caller");
            return Ok(token);
        }

        let start = Instant::now();
        let result = self.acquire_token().await;
        if let Some(callback) = &self.config.on_refresh {
            callback(TokenRefreshEvent {
                success: result.is_ok(),
                error_category: result.as_ref().err().map(TokenError::category),
                duration: start.elapsed(),
            });
        }

        let outcome = match result {
            Ok(credential) => {
                let token = credential.token.clone();
                *self.cache.write().await = Some(credential);
                Ok(token)
            }
            Err(e) => Err(e),
        };
        *last_outcome = Some(outcome.clone());
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Drop the cached token if it is still `rejected`, so the next
    /// [`get_token`](Self::get_token) re-exchanges.
    ///
    /// A token obtained after `rejected` was handed out is left in place.
    pub async fn invalidate(&self, rejected: &SecretString) {
        let mut cache = self.cache.write().await;
        let is_rejected = cache
            .as_ref()
            .is_some_and(|c| c.token.expose_secret() == rejected.expose_secret());
        if is_rejected {
            *cache = None;
            info!(target: "common.token_manager", "Cached provider token invalidated");
        } else {
            debug!(target: "common.token_manager", "Rejected token already replaced");
        }
    }

    async fn cached_token(&self) -> Option<SecretString> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| c.is_usable_at(Utc::now()))
            .map(|c| c.token.clone())
    }

    /// Perform the account-credentials exchange.
    #[instrument(skip_all)]
    async fn acquire_token(&self) -> Result<Credential, TokenError> {
        let (account_id, client_id, client_secret) = self.config.credentials()?;
        let url = format!(
            "{}/oauth/token",
            self.config.auth_base_url.trim_end_matches('/')
        );

        debug!(
            target: "common.token_manager",
            client_id = %client_id,
            url = %url,
            "Requesting provider token"
        );

        let response = self
            .http_client
            .post(&url)
            .query(&[("grant_type", GRANT_TYPE), ("account_id", account_id)])
            .basic_auth(client_id, Some(client_secret.expose_secret()))
            .send()
            .await
            .map_err(|e| {
                warn!(target: "common.token_manager", error = %e, "Token request failed");
                TokenError::HttpError(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
                warn!(target: "common.token_manager", error = %e, "Failed to parse token response");
                TokenError::InvalidResponse(e.to_string())
            })?;

            let usable = Duration::from_secs(token_response.expires_in)
                .saturating_sub(self.config.safety_buffer);
            let expires_at = chrono::Duration::from_std(usable)
                .ok()
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                .ok_or_else(|| {
                    warn!(
                        target: "common.token_manager",
                        expires_in_secs = token_response.expires_in,
                        "Token lifetime out of range"
                    );
                    TokenError::InvalidResponse(format!(
                        "expires_in out of range: {}",
                        token_response.expires_in
                    ))
                })?;

            info!(
                target: "common.token_manager",
                client_id = %client_id,
                expires_in_secs = token_response.expires_in,
                "Provider token acquired"
            );

            Ok(Credential {
                token: SecretString::from(token_response.access_token),
                expires_at,
            })
        } else if matches!(status.as_u16(), 400 | 401 | 403) {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "common.token_manager", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(
                target: "common.token_manager",
                status = %status,
                "Credential exchange rejected by provider"
            );
            trace!(
                target: "common.token_manager",
                body = %body,
                "Rejection response body"
            );
            Err(TokenError::AuthenticationRejected(format!("Status {status}")))
        } else if status.is_server_error() {
            warn!(
                target: "common.token_manager",
                status = %status,
                "Provider auth server error"
            );
            Err(TokenError::HttpError(format!("Provider server error: {status}")))
        } else {
            warn!(
                target: "common.token_manager",
                status = %status,
                "Unexpected response from provider auth"
            );
            Err(TokenError::HttpError(format!("Unexpected status: {status}")))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
