//! Meeting Provisioner configuration.
//!
//! Configuration is loaded from environment variables. Secrets are held as
//! `SecretString` and every sensitive field is redacted in Debug output.
//!
//! Provider credentials are optional at startup: embedded sessions need none,
//! and their absence surfaces as a configuration error on first use.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use common::token_manager::DEFAULT_SAFETY_BUFFER;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default provider auth host (token endpoint lives at `/oauth/token`).
pub const DEFAULT_PROVIDER_AUTH_URL: &str = "https://zoom.us";

/// Default provider REST API base.
pub const DEFAULT_PROVIDER_API_URL: &str = "https://api.zoom.us/v2";

/// Default timeout on every outbound provider call.
pub const DEFAULT_PROVIDER_TIMEOUT_SECONDS: u64 = 10;

/// Default join URL prefix for embedded rooms.
pub const DEFAULT_EMBEDDED_ROOM_BASE_URL: &str = "https://meet.local";

/// Default timezone sent with provider meeting requests.
pub const DEFAULT_MEETING_TIMEZONE: &str = "UTC";

/// Default graceful shutdown drain period.
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

/// Meeting Provisioner configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL. `None` selects the in-memory session store.
    pub database_url: Option<String>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// HMAC key the surrounding application signs caller tokens with.
    pub auth_jwt_secret: SecretString,

    /// JWT clock skew tolerance in seconds for `iat` validation.
    pub jwt_clock_skew_seconds: i64,

    /// Provider account id (grant parameter).
    pub provider_account_id: Option<String>,

    /// Provider OAuth client id.
    pub provider_client_id: Option<String>,

    /// Provider OAuth client secret.
    pub provider_client_secret: Option<SecretString>,

    /// Provider auth host.
    pub provider_auth_url: String,

    /// Provider REST API base URL.
    pub provider_api_url: String,

    /// Timeout applied to every outbound provider call.
    pub provider_timeout_seconds: u64,

    /// Subtracted from the provider's `expires_in` when caching tokens.
    pub token_safety_buffer_seconds: u64,

    /// Join URL prefix for embedded rooms.
    pub embedded_room_base_url: String,

    /// Timezone sent with provider meeting requests.
    pub default_meeting_timezone: String,

    /// Graceful shutdown drain period in seconds.
    pub drain_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("bind_address", &self.bind_address)
            .field("auth_jwt_secret", &"[REDACTED]")
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("provider_account_id", &self.provider_account_id)
            .field("provider_client_id", &self.provider_client_id)
            .field(
                "provider_client_secret",
                &self.provider_client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("provider_auth_url", &self.provider_auth_url)
            .field("provider_api_url", &self.provider_api_url)
            .field("provider_timeout_seconds", &self.provider_timeout_seconds)
            .field(
                "token_safety_buffer_seconds",
                &self.token_safety_buffer_seconds,
            )
            .field("embedded_room_base_url", &self.embedded_room_base_url)
            .field("default_meeting_timezone", &self.default_meeting_timezone)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid provider timeout configuration: {0}")]
    InvalidProviderTimeout(String),

    #[error("Invalid numeric configuration: {0}")]
    InvalidNumber(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = non_empty(vars, "DATABASE_URL");

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let auth_jwt_secret = non_empty(vars, "AUTH_JWT_SECRET")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_JWT_SECRET".to_string()))?;

        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let provider_timeout_seconds = parse_u64(
            vars,
            "PROVIDER_TIMEOUT_SECONDS",
            DEFAULT_PROVIDER_TIMEOUT_SECONDS,
        )?;
        if provider_timeout_seconds == 0 {
            return Err(ConfigError::InvalidProviderTimeout(
                "PROVIDER_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        let token_safety_buffer_seconds = parse_u64(
            vars,
            "TOKEN_SAFETY_BUFFER_SECONDS",
            DEFAULT_SAFETY_BUFFER.as_secs(),
        )?;

        let drain_seconds = parse_u64(vars, "MP_DRAIN_SECONDS", DEFAULT_DRAIN_SECONDS)?;

        Ok(Config {
            database_url,
            bind_address,
            auth_jwt_secret,
            jwt_clock_skew_seconds,
            provider_account_id: non_empty(vars, "PROVIDER_ACCOUNT_ID"),
            provider_client_id: non_empty(vars, "PROVIDER_CLIENT_ID"),
            provider_client_secret: non_empty(vars, "PROVIDER_CLIENT_SECRET")
                .map(SecretString::from),
            provider_auth_url: non_empty(vars, "PROVIDER_AUTH_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_AUTH_URL.to_string()),
            provider_api_url: non_empty(vars, "PROVIDER_API_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_API_URL.to_string()),
            provider_timeout_seconds,
            token_safety_buffer_seconds,
            embedded_room_base_url: non_empty(vars, "EMBEDDED_ROOM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_EMBEDDED_ROOM_BASE_URL.to_string()),
            default_meeting_timezone: non_empty(vars, "DEFAULT_MEETING_TIMEZONE")
                .unwrap_or_else(|| DEFAULT_MEETING_TIMEZONE.to_string()),
            drain_seconds,
        })
    }

    /// Timeout for outbound provider calls.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Safety buffer for cached provider tokens.
    pub fn token_safety_buffer(&self) -> Duration {
        Duration::from_secs(self.token_safety_buffer_seconds)
    }

    /// Whether all three provider credentials are present.
    pub fn has_provider_credentials(&self) -> bool {
        self.provider_account_id.is_some()
            && self.provider_client_id.is_some()
            && self
                .provider_client_secret
                .as_ref()
                .is_some_and(|s| !s.expose_secret().is_empty())
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_u64(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(key) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidNumber(format!(
                "{} must be a valid non-negative integer, got '{}': {}",
                key, value_str, e
            ))
        }),
        None => Ok(default),
    }
}
