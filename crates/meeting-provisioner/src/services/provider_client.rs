//! External meeting provider HTTP client.
//!
//! Creates, reads, updates, and deletes remote meetings. Every call carries
//! a bearer token from the shared [`TokenManager`].
//!
//! # Retry policy
//!
//! - A 401 invalidates the cached token and the call is repeated exactly
//!   once with a fresh token (all operations).
//! - `get` and `delete` are retried up to [`MAX_IDEMPOTENT_RETRIES`] times on
//!   connect errors and timeouts.
//! - `create` and `update` are never retried otherwise; a duplicate create
//!   would leave an orphaned remote meeting.
//!
//! # Security
//!
//! - Provider error bodies are logged at debug level only; callers get a
//!   sanitized message with URLs stripped
//! - The host start URL is held as `SecretString` on [`MeetingHandle`]
//! - Every request has connect and total timeouts

use crate::errors::MpError;
use crate::models::{
    CreateMeetingParams, MeetingHandle, MeetingSettings, MeetingSettingsOverrides,
    UpdateMeetingParams,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::token_manager::TokenManager;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Connect timeout for provider requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport-error retries for idempotent operations.
pub const MAX_IDEMPOTENT_RETRIES: u32 = 2;

/// Base backoff between transport retries (multiplied by attempt number).
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Provider meeting type for a scheduled (non-recurring) meeting.
const SCHEDULED_MEETING_TYPE: u8 = 2;

/// Start time format expected by the provider (UTC, second precision).
const PROVIDER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Upper bound on provider text echoed to callers.
const MAX_PROVIDER_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Create,
    Get,
    Update,
    Delete,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn retries_transport_errors(self) -> bool {
        matches!(self, Operation::Get | Operation::Delete)
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Remote meeting operations (enables mocking).
#[async_trait]
pub trait MeetingProvider: Send + Sync {
    /// Create a scheduled meeting.
    async fn create_meeting(&self, params: &CreateMeetingParams) -> Result<MeetingHandle, MpError>;

    /// Fetch a meeting by provider id.
    async fn get_meeting(&self, external_id: &str) -> Result<MeetingHandle, MpError>;

    /// Patch the given fields of a meeting.
    async fn update_meeting(
        &self,
        external_id: &str,
        params: &UpdateMeetingParams,
    ) -> Result<(), MpError>;

    /// Delete a meeting. An already-absent meeting is not an error.
    async fn delete_meeting(&self, external_id: &str) -> Result<(), MpError>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct CreateMeetingBody<'a> {
    topic: &'a str,
    #[serde(rename = "type")]
    meeting_type: u8,
    start_time: String,
    duration: i32,
    timezone: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agenda: Option<&'a str>,
    settings: MeetingSettings,
}

#[derive(Serialize)]
struct UpdateMeetingBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agenda: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<SettingsPatch<'a>>,
}

/// Partial settings in the provider's field naming.
#[derive(Serialize)]
struct SettingsPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    host_video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    participant_video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    join_before_host: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mute_upon_entry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watermark: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_pmi: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approval_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_recording: Option<&'a str>,
}

impl<'a> From<&'a MeetingSettingsOverrides> for SettingsPatch<'a> {
    fn from(o: &'a MeetingSettingsOverrides) -> Self {
        Self {
            host_video: o.host_video,
            participant_video: o.participant_video,
            join_before_host: o.join_before_host,
            mute_upon_entry: o.mute_upon_entry,
            watermark: o.watermark,
            use_pmi: o.use_pmi,
            approval_type: o.approval_type,
            audio: o.audio.as_deref(),
            auto_recording: o.auto_recording.as_deref(),
        }
    }
}

/// The provider returns numeric ids; accept either form.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProviderMeetingId {
    Number(u64),
    Text(String),
}

impl ProviderMeetingId {
    fn into_string(self) -> String {
        match self {
            ProviderMeetingId::Number(n) => n.to_string(),
            ProviderMeetingId::Text(s) => s,
        }
    }
}

/// Meeting object returned by create and get. No `Debug`: holds `start_url`.
#[derive(Deserialize)]
struct ProviderMeeting {
    id: ProviderMeetingId,
    #[serde(default)]
    topic: String,
    join_url: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration: Option<i32>,
    #[serde(default)]
    start_url: Option<String>,
}

impl ProviderMeeting {
    fn into_handle(self) -> Result<MeetingHandle, MpError> {
        let (Some(start_time), Some(duration_minutes)) = (self.start_time, self.duration) else {
            warn!(target: "mp.services.provider_client", "Provider meeting is missing schedule fields");
            return Err(incomplete_response());
        };

        Ok(MeetingHandle {
            external_id: self.id.into_string(),
            join_url: self.join_url,
            password: self.password.unwrap_or_default(),
            topic: self.topic,
            start_time,
            duration_minutes,
            host_control_url: SecretString::from(self.start_url.unwrap_or_default()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the external meeting provider.
pub struct MeetingProviderClient {
    http_client: Client,
    api_base_url: String,
    token_manager: Arc<TokenManager>,
    default_timezone: String,
}

impl MeetingProviderClient {
    /// Create a provider client.
    ///
    /// # Errors
    ///
    /// Returns `MpError::Internal` if the HTTP client cannot be built.
    pub fn new(
        api_base_url: String,
        token_manager: Arc<TokenManager>,
        timeout: Duration,
        default_timezone: String,
    ) -> Result<Self, MpError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| {
                error!(target: "mp.services.provider_client", error = %e, "Failed to build HTTP client");
                MpError::Internal("Failed to build provider HTTP client".to_string())
            })?;

        Ok(Self {
            http_client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            token_manager,
            default_timezone,
        })
    }

    /// Create a scheduled meeting.
    ///
    /// # Errors
    ///
    /// - `MpError::Validation` if topic, start time, or duration is missing (no network call)
    /// - `MpError::Configuration` / `MpError::Authentication` from the token manager
    /// - `MpError::Provider` on any other non-2xx response or transport failure
    #[instrument(skip_all, name = "mp.provider.create")]
    pub async fn create(&self, params: &CreateMeetingParams) -> Result<MeetingHandle, MpError> {
        let (topic, start_time, duration) = validate_create(params)?;
        let start = Instant::now();

        let body = CreateMeetingBody {
            topic,
            meeting_type: SCHEDULED_MEETING_TYPE,
            start_time: start_time.format(PROVIDER_TIME_FORMAT).to_string(),
            duration,
            timezone: params
                .timezone
                .as_deref()
                .unwrap_or(self.default_timezone.as_str()),
            password: params.password.as_deref(),
            agenda: params.agenda.as_deref(),
            settings: MeetingSettings::with_overrides(params.settings.as_ref()),
        };
        let url = format!("{}/users/me/meetings", self.api_base_url);

        let result = async {
            let response = self
                .execute(Operation::Create, |client| client.post(&url).json(&body))
                .await?;
            if !response.status().is_success() {
                return Err(error_from_response(Operation::Create, response).await);
            }
            parse_meeting(response).await
        }
        .await;

        record(Operation::Create, start, &result);
        if let Ok(handle) = &result {
            info!(
                target: "mp.services.provider_client",
                meeting_id = %handle.external_id,
                duration_minutes = handle.duration_minutes,
                "Provider meeting created"
            );
        }
        result
    }

    /// Fetch a meeting.
    ///
    /// # Errors
    ///
    /// - `MpError::NotFound` if the provider has no such meeting
    /// - `MpError::Provider` on any other non-2xx response or transport failure
    #[instrument(skip_all, name = "mp.provider.get", fields(meeting_id = %external_id))]
    pub async fn get(&self, external_id: &str) -> Result<MeetingHandle, MpError> {
        validate_meeting_id(external_id)?;
        let start = Instant::now();
        let url = format!("{}/meetings/{}", self.api_base_url, external_id);

        let result = async {
            let response = self
                .execute(Operation::Get, |client| client.get(&url))
                .await?;
            if !response.status().is_success() {
                return Err(error_from_response(Operation::Get, response).await);
            }
            parse_meeting(response).await
        }
        .await;

        record(Operation::Get, start, &result);
        result
    }

    /// Patch a meeting. Session scheduling fields are not touched.
    ///
    /// # Errors
    ///
    /// - `MpError::Validation` if no field is set or a set field is invalid
    /// - `MpError::NotFound` if the provider has no such meeting
    /// - `MpError::Provider` on any other non-2xx response or transport failure
    #[instrument(skip_all, name = "mp.provider.update", fields(meeting_id = %external_id))]
    pub async fn update(
        &self,
        external_id: &str,
        params: &UpdateMeetingParams,
    ) -> Result<(), MpError> {
        validate_meeting_id(external_id)?;
        validate_update(params)?;
        let start = Instant::now();

        let body = UpdateMeetingBody {
            topic: params.topic.as_deref().map(str::trim),
            start_time: params
                .start_time
                .map(|t| t.format(PROVIDER_TIME_FORMAT).to_string()),
            duration: params.duration_minutes,
            timezone: params.timezone.as_deref(),
            password: params.password.as_deref(),
            agenda: params.agenda.as_deref(),
            settings: params.settings.as_ref().map(SettingsPatch::from),
        };
        let url = format!("{}/meetings/{}", self.api_base_url, external_id);

        let result = async {
            let response = self
                .execute(Operation::Update, |client| client.patch(&url).json(&body))
                .await?;
            if !response.status().is_success() {
                return Err(error_from_response(Operation::Update, response).await);
            }
            Ok(())
        }
        .await;

        record(Operation::Update, start, &result);
        result
    }

    /// Delete a meeting. A 404 from the provider counts as success.
    ///
    /// # Errors
    ///
    /// - `MpError::Provider` on any other non-2xx response or transport failure
    #[instrument(skip_all, name = "mp.provider.delete", fields(meeting_id = %external_id))]
    pub async fn delete(&self, external_id: &str) -> Result<(), MpError> {
        validate_meeting_id(external_id)?;
        let start = Instant::now();
        let url = format!("{}/meetings/{}", self.api_base_url, external_id);

        let result = async {
            let response = self
                .execute(Operation::Delete, |client| client.delete(&url))
                .await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                debug!(target: "mp.services.provider_client", "Meeting already absent at provider");
                return Ok(());
            }
            if !status.is_success() {
                return Err(error_from_response(Operation::Delete, response).await);
            }
            Ok(())
        }
        .await;

        record(Operation::Delete, start, &result);
        if result.is_ok() {
            info!(target: "mp.services.provider_client", "Provider meeting deleted");
        }
        result
    }

    /// Send a request built by `build`, applying the token and retry policy.
    ///
    /// Returns the final response whatever its status, except that a 401 is
    /// only returned after the single token refresh has been spent.
    async fn execute<F>(&self, operation: Operation, build: F) -> Result<Response, MpError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut token_refreshed = false;
        let mut transport_retries = 0u32;

        loop {
            let token = self.token_manager.get_token().await?;
            let sent = build(&self.http_client)
                .bearer_auth(token.expose_secret())
                .send()
                .await;

            match sent {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED && !token_refreshed => {
                    warn!(
                        target: "mp.services.provider_client",
                        operation = operation.as_str(),
                        "Provider rejected bearer token, refreshing once"
                    );
                    self.token_manager.invalidate(&token).await;
                    token_refreshed = true;
                }
                Ok(response) => return Ok(response),
                Err(e)
                    if operation.retries_transport_errors()
                        && transport_retries < MAX_IDEMPOTENT_RETRIES
                        && (e.is_connect() || e.is_timeout()) =>
                {
                    transport_retries += 1;
                    warn!(
                        target: "mp.services.provider_client",
                        operation = operation.as_str(),
                        attempt = transport_retries,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * transport_retries).await;
                }
                Err(e) => {
                    warn!(
                        target: "mp.services.provider_client",
                        operation = operation.as_str(),
                        error = %e,
                        "Provider request failed"
                    );
                    return Err(transport_error(&e));
                }
            }
        }
    }
}

#[async_trait]
impl MeetingProvider for MeetingProviderClient {
    async fn create_meeting(&self, params: &CreateMeetingParams) -> Result<MeetingHandle, MpError> {
        self.create(params).await
    }

    async fn get_meeting(&self, external_id: &str) -> Result<MeetingHandle, MpError> {
        self.get(external_id).await
    }

    async fn update_meeting(
        &self,
        external_id: &str,
        params: &UpdateMeetingParams,
    ) -> Result<(), MpError> {
        self.update(external_id, params).await
    }

    async fn delete_meeting(&self, external_id: &str) -> Result<(), MpError> {
        self.delete(external_id).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Check required create fields, returning (topic, start time, duration).
pub(crate) fn validate_create(
    params: &CreateMeetingParams,
) -> Result<(&str, DateTime<Utc>, i32), MpError> {
    let topic = params
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| MpError::Validation("topic is required".to_string()))?;
    let start_time = params
        .start_time
        .ok_or_else(|| MpError::Validation("startTime is required".to_string()))?;
    let duration = params
        .duration_minutes
        .ok_or_else(|| MpError::Validation("durationMinutes is required".to_string()))?;
    if duration <= 0 {
        return Err(MpError::Validation(
            "durationMinutes must be positive".to_string(),
        ));
    }
    Ok((topic, start_time, duration))
}

pub(crate) fn validate_update(params: &UpdateMeetingParams) -> Result<(), MpError> {
    if params.is_empty() {
        return Err(MpError::Validation(
            "At least one field must be provided".to_string(),
        ));
    }
    if params.topic.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(MpError::Validation("topic must not be blank".to_string()));
    }
    if params.duration_minutes.is_some_and(|d| d <= 0) {
        return Err(MpError::Validation(
            "durationMinutes must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Provider ids are path segments; reject anything that could alter the URL.
pub(crate) fn validate_meeting_id(external_id: &str) -> Result<(), MpError> {
    let valid = !external_id.is_empty()
        && external_id.len() <= 64
        && external_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MpError::Validation("Invalid meeting id".to_string()))
    }
}

async fn parse_meeting(response: Response) -> Result<MeetingHandle, MpError> {
    let meeting: ProviderMeeting = response.json().await.map_err(|e| {
        warn!(target: "mp.services.provider_client", error = %e, "Failed to parse provider meeting");
        incomplete_response()
    })?;
    meeting.into_handle()
}

async fn error_from_response(operation: Operation, response: Response) -> MpError {
    let status = response.status();
    let body: Option<ProviderErrorBody> = response.json().await.ok();
    let upstream_message = body
        .as_ref()
        .and_then(|b| b.message.as_deref())
        .unwrap_or_default();

    debug!(
        target: "mp.services.provider_client",
        operation = operation.as_str(),
        status = %status,
        upstream_code = ?body.as_ref().and_then(|b| b.code),
        upstream_message = %upstream_message,
        "Provider error response"
    );

    match status {
        StatusCode::NOT_FOUND => MpError::NotFound("Meeting not found".to_string()),
        StatusCode::UNAUTHORIZED => MpError::Authentication(
            "Provider rejected a freshly issued token".to_string(),
        ),
        _ => MpError::Provider {
            status: status.as_u16(),
            message: sanitize_provider_message(upstream_message),
        },
    }
}

fn transport_error(e: &reqwest::Error) -> MpError {
    if e.is_timeout() {
        MpError::Provider {
            status: StatusCode::GATEWAY_TIMEOUT.as_u16(),
            message: "The meeting provider did not respond in time".to_string(),
        }
    } else {
        MpError::Provider {
            status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            message: "The meeting provider is unavailable".to_string(),
        }
    }
}

fn incomplete_response() -> MpError {
    MpError::Provider {
        status: StatusCode::BAD_GATEWAY.as_u16(),
        message: "The meeting provider returned an unexpected response".to_string(),
    }
}

/// Drop URL-like tokens and bound the length of provider text.
fn sanitize_provider_message(raw: &str) -> String {
    let cleaned = raw
        .split_whitespace()
        .filter(|word| !word.contains("://"))
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        return "The meeting provider rejected the request".to_string();
    }

    let bounded: String = cleaned.chars().take(MAX_PROVIDER_MESSAGE_CHARS).collect();
    format!("The meeting provider rejected the request: {bounded}")
}

fn record<T>(operation: Operation, start: Instant, result: &Result<T, MpError>) {
    let status = match result {
        Ok(_) => "success",
        Err(MpError::Provider { status: 504, .. }) => "timeout",
        Err(_) => "error",
    };
    metrics::record_provider_request(operation.as_str(), status, start.elapsed());
}

// ============================================================================
// Mock
// ============================================================================

/// In-memory provider for tests and local development.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Mock provider backed by a map of meetings.
    ///
    /// Applies the same parameter validation as the real client, so a
    /// validation failure never counts as a call.
    pub struct MockMeetingProvider {
        meetings: Mutex<HashMap<String, MeetingHandle>>,
        next_id: AtomicU64,
        create_calls: AtomicUsize,
        get_calls: AtomicUsize,
        update_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        return_error: bool,
        create_delay: Option<Duration>,
    }

    impl Default for MockMeetingProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockMeetingProvider {
        /// Create a mock that succeeds.
        pub fn new() -> Self {
            Self {
                meetings: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(81_000_000_001),
                create_calls: AtomicUsize::new(0),
                get_calls: AtomicUsize::new(0),
                update_calls: AtomicUsize::new(0),
                delete_calls: AtomicUsize::new(0),
                return_error: false,
                create_delay: None,
            }
        }

        /// Create a mock whose every call fails with a provider 503.
        pub fn failing() -> Self {
            Self {
                return_error: true,
                ..Self::new()
            }
        }

        /// Delay each create, to hold a bind in flight.
        pub fn with_create_delay(mut self, delay: Duration) -> Self {
            self.create_delay = Some(delay);
            self
        }

        pub fn create_calls(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }

        pub fn get_calls(&self) -> usize {
            self.get_calls.load(Ordering::SeqCst)
        }

        pub fn update_calls(&self) -> usize {
            self.update_calls.load(Ordering::SeqCst)
        }

        pub fn delete_calls(&self) -> usize {
            self.delete_calls.load(Ordering::SeqCst)
        }

        /// Total calls across all operations.
        pub fn total_calls(&self) -> usize {
            self.create_calls() + self.get_calls() + self.update_calls() + self.delete_calls()
        }

        /// Whether a meeting with this id currently exists.
        pub fn contains(&self, external_id: &str) -> bool {
            self.lock().contains_key(external_id)
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MeetingHandle>> {
            self.meetings.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn failure() -> MpError {
            MpError::Provider {
                status: 503,
                message: "The meeting provider is unavailable".to_string(),
            }
        }
    }

    #[async_trait]
    impl MeetingProvider for MockMeetingProvider {
        async fn create_meeting(
            &self,
            params: &CreateMeetingParams,
        ) -> Result<MeetingHandle, MpError> {
            let (topic, start_time, duration_minutes) = validate_create(params)?;
            self.create_calls.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            if self.return_error {
                return Err(Self::failure());
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            let handle = MeetingHandle {
                external_id: id.clone(),
                join_url: format!("https://provider.mock/j/{id}"),
                password: params.password.clone().unwrap_or_else(|| "mock-pw".to_string()),
                topic: topic.to_string(),
                start_time,
                duration_minutes,
                host_control_url: SecretString::from(format!(
                    "https://provider.mock/s/{id}?zak=mock-host"
                )),
            };
            self.lock().insert(id, handle.clone());
            Ok(handle)
        }

        async fn get_meeting(&self, external_id: &str) -> Result<MeetingHandle, MpError> {
            validate_meeting_id(external_id)?;
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.return_error {
                return Err(Self::failure());
            }
            self.lock()
                .get(external_id)
                .cloned()
                .ok_or_else(|| MpError::NotFound("Meeting not found".to_string()))
        }

        async fn update_meeting(
            &self,
            external_id: &str,
            params: &UpdateMeetingParams,
        ) -> Result<(), MpError> {
            validate_meeting_id(external_id)?;
            validate_update(params)?;
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            if self.return_error {
                return Err(Self::failure());
            }

            let mut meetings = self.lock();
            let handle = meetings
                .get_mut(external_id)
                .ok_or_else(|| MpError::NotFound("Meeting not found".to_string()))?;
            if let Some(topic) = &params.topic {
                handle.topic = topic.trim().to_string();
            }
            if let Some(start_time) = params.start_time {
                handle.start_time = start_time;
            }
            if let Some(duration) = params.duration_minutes {
                handle.duration_minutes = duration;
            }
            if let Some(password) = &params.password {
                handle.password.clone_from(password);
            }
            Ok(())
        }

        async fn delete_meeting(&self, external_id: &str) -> Result<(), MpError> {
            validate_meeting_id(external_id)?;
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.return_error {
                return Err(Self::failure());
            }
            self.lock().remove(external_id);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::token_manager::TokenManagerConfig;
    use wiremock::matchers::{any, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_manager(base_url: &str) -> Arc<TokenManager> {
        let config = TokenManagerConfig::new(base_url.to_string()).with_credentials(
            Some("acct-1".to_string()),
            Some("client-1".to_string()),
            Some(SecretString::from("secret-1")),
        );
        Arc::new(TokenManager::new(config).unwrap())
    }

    fn client_with_timeout(server: &MockServer, timeout: Duration) -> MeetingProviderClient {
        MeetingProviderClient::new(
            server.uri(),
            token_manager(&server.uri()),
            timeout,
            "UTC".to_string(),
        )
        .unwrap()
    }

    fn client(server: &MockServer) -> MeetingProviderClient {
        client_with_timeout(server, Duration::from_secs(5))
    }

    async fn mount_token(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": token,
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
    }

    fn meeting_json() -> serde_json::Value {
        serde_json::json!({
            "id": 85746065432_u64,
            "topic": "Algebra",
            "type": 2,
            "start_time": "2025-06-01T15:00:00Z",
            "duration": 60,
            "timezone": "UTC",
            "password": "x7Yq2",
            "join_url": "https://provider.test/j/85746065432?pwd=abc",
            "start_url": "https://provider.test/s/85746065432?zak=host-secret"
        })
    }

    fn algebra_params() -> CreateMeetingParams {
        CreateMeetingParams {
            topic: Some("Algebra".to_string()),
            start_time: Some(Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap()),
            duration_minutes: Some(60),
            ..Default::default()
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;

        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .and(header("authorization", "Bearer tok-1"))
            .and(body_partial_json(serde_json::json!({
                "topic": "Algebra",
                "type": 2,
                "start_time": "2025-06-01T15:00:00Z",
                "duration": 60,
                "timezone": "UTC"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(meeting_json()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/meetings/85746065432"))
            .respond_with(ResponseTemplate::new(200).set_body_json(meeting_json()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let created = client.create(&algebra_params()).await.unwrap();
        let fetched = client.get(&created.external_id).await.unwrap();

        assert_eq!(created.external_id, "85746065432");
        assert_eq!(fetched.topic, "Algebra");
        assert_eq!(
            fetched.start_time,
            Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap()
        );
        assert_eq!(fetched.duration_minutes, 60);
        assert_eq!(fetched.password, "x7Yq2");
    }

    #[tokio::test]
    async fn test_create_sends_default_settings() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;

        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .and(body_partial_json(serde_json::json!({
                "settings": {
                    "host_video": true,
                    "participant_video": true,
                    "join_before_host": true,
                    "mute_upon_entry": true,
                    "watermark": false,
                    "use_pmi": false,
                    "approval_type": 2,
                    "audio": "both",
                    "auto_recording": "none"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(meeting_json()))
            .expect(1)
            .mount(&server)
            .await;

        let mut params = algebra_params();
        params.settings = Some(MeetingSettingsOverrides {
            mute_upon_entry: Some(true),
            ..Default::default()
        });

        client(&server).create(&params).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_missing_topic_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut params = algebra_params();
        params.topic = None;
        let err = client(&server).create(&params).await.unwrap_err();
        assert!(matches!(err, MpError::Validation(ref m) if m.contains("topic")));

        let mut params = algebra_params();
        params.topic = Some("   ".to_string());
        assert!(matches!(
            client(&server).create(&params).await,
            Err(MpError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_missing_start_or_duration() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let client = client(&server);

        let mut params = algebra_params();
        params.start_time = None;
        assert!(matches!(client.create(&params).await, Err(MpError::Validation(_))));

        let mut params = algebra_params();
        params.duration_minutes = None;
        assert!(matches!(client.create(&params).await, Err(MpError::Validation(_))));

        let mut params = algebra_params();
        params.duration_minutes = Some(0);
        assert!(matches!(client.create(&params).await, Err(MpError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_server_error_is_not_retried() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;

        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "code": 500, "message": "Internal error"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).create(&algebra_params()).await.unwrap_err();
        assert!(matches!(err, MpError::Provider { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_create_timeout_is_not_retried() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;

        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(meeting_json())
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_timeout(&server, Duration::from_millis(300));
        let err = client.create(&algebra_params()).await.unwrap_err();
        assert!(matches!(err, MpError::Provider { status: 504, .. }));
    }

    // =========================================================================
    // Token handling
    // =========================================================================

    #[tokio::test]
    async fn test_401_refreshes_token_and_retries_once() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok", "token_type": "bearer", "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .respond_with(ResponseTemplate::new(201).set_body_json(meeting_json()))
            .expect(1)
            .mount(&server)
            .await;

        let handle = client(&server).create(&algebra_params()).await.unwrap();
        assert_eq!(handle.external_id, "85746065432");
    }

    #[tokio::test]
    async fn test_repeated_401_fails_after_one_retry() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("GET"))
            .and(path("/meetings/123"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).get("123").await.unwrap_err();
        assert!(matches!(err, MpError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_missing_credentials_surface_as_configuration_error() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let manager =
            Arc::new(TokenManager::new(TokenManagerConfig::new(server.uri())).unwrap());
        let client = MeetingProviderClient::new(
            server.uri(),
            manager,
            Duration::from_secs(5),
            "UTC".to_string(),
        )
        .unwrap();

        assert!(matches!(
            client.create(&algebra_params()).await,
            Err(MpError::Configuration(_))
        ));
    }

    // =========================================================================
    // Get / Update / Delete
    // =========================================================================

    #[tokio::test]
    async fn test_get_missing_meeting_is_not_found() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("GET"))
            .and(path("/meetings/404404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "code": 3001, "message": "Meeting does not exist: 404404."
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).get("404404").await,
            Err(MpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_retries_timeouts() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("GET"))
            .and(path("/meetings/85746065432"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(meeting_json())
                    .set_delay(Duration::from_secs(2)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/meetings/85746065432"))
            .respond_with(ResponseTemplate::new(200).set_body_json(meeting_json()))
            .mount(&server)
            .await;

        let client = client_with_timeout(&server, Duration::from_millis(300));
        let handle = client.get("85746065432").await.unwrap();
        assert_eq!(handle.topic, "Algebra");
    }

    #[tokio::test]
    async fn test_get_rejects_path_like_ids_without_request() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        for id in ["", "../users/me", "1?x=y", "a/b"] {
            assert!(matches!(
                client(&server).get(id).await,
                Err(MpError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_update_sends_only_set_fields() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("PATCH"))
            .and(path("/meetings/85746065432"))
            .and(body_partial_json(serde_json::json!({
                "topic": "Geometry",
                "settings": { "mute_upon_entry": true }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let params = UpdateMeetingParams {
            topic: Some("Geometry".to_string()),
            settings: Some(MeetingSettingsOverrides {
                mute_upon_entry: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        client(&server)
            .update("85746065432", &params)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_with_no_fields_is_validation_error() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server)
                .update("85746065432", &UpdateMeetingParams::default())
                .await,
            Err(MpError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_absent_meeting_is_success() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("DELETE"))
            .and(path("/meetings/999"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "code": 3001, "message": "Meeting does not exist: 999."
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete("999").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_success() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("DELETE"))
            .and(path("/meetings/85746065432"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete("85746065432").await.unwrap();
    }

    // =========================================================================
    // Sanitization
    // =========================================================================

    #[tokio::test]
    async fn test_provider_message_is_sanitized() {
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;

        Mock::given(method("POST"))
            .and(path("/users/me/meetings"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": 300,
                "message": "Invalid start_time, see https://provider.test/s/1?zak=host-secret for details"
            })))
            .mount(&server)
            .await;

        let err = client(&server).create(&algebra_params()).await.unwrap_err();
        assert!(matches!(err, MpError::Provider { status: 400, .. }));

        let message = err.to_string();
        assert!(message.contains("Invalid start_time"));
        assert!(!message.contains("zak="));
        assert!(!message.contains("https://"));
    }

    #[test]
    fn test_sanitize_bounds_length() {
        let long = "x".repeat(1000);
        let message = sanitize_provider_message(&long);
        assert!(message.len() < 300);
        assert_eq!(
            sanitize_provider_message(""),
            "The meeting provider rejected the request"
        );
    }

    #[test]
    fn test_handle_keeps_host_url_secret() {
        let meeting: ProviderMeeting = serde_json::from_value(meeting_json()).unwrap();
        let handle = meeting.into_handle().unwrap();

        assert_eq!(
            handle.host_control_url.expose_secret(),
            "https://provider.test/s/85746065432?zak=host-secret"
        );
        assert!(!format!("{handle:?}").contains("host-secret"));
    }

    #[test]
    fn test_string_meeting_id_accepted() {
        let mut json = meeting_json();
        json["id"] = serde_json::json!("abc-123");
        let meeting: ProviderMeeting = serde_json::from_value(json).unwrap();
        assert_eq!(meeting.into_handle().unwrap().external_id, "abc-123");
    }

    // =========================================================================
    // Mock
    // =========================================================================

    #[tokio::test]
    async fn test_mock_validates_before_counting() {
        let provider = mock::MockMeetingProvider::new();
        let mut params = algebra_params();
        params.topic = None;

        assert!(provider.create_meeting(&params).await.is_err());
        assert_eq!(provider.total_calls(), 0);

        let handle = provider.create_meeting(&algebra_params()).await.unwrap();
        assert!(provider.contains(&handle.external_id));
        provider.delete_meeting(&handle.external_id).await.unwrap();
        provider.delete_meeting(&handle.external_id).await.unwrap();
        assert!(!provider.contains(&handle.external_id));
        assert_eq!(provider.delete_calls(), 2);
    }
}
