//! Provider selection.
//!
//! Maps a session's conferencing choice to a [`ConferencingBackend`]. Every
//! backend returns the same [`MeetingBinding`] shape, so callers never branch
//! on the provider. Adding a provider means one new backend plus one arm in
//! [`ProviderSelector::for_provider`].

use crate::errors::MpError;
use crate::models::{ConferencingProvider, CreateMeetingParams, MeetingBinding, Session};
use crate::services::provider_client::MeetingProvider;
use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Base62 alphabet for room codes and passwords.
const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Embedded room code: 12 base62 chars from 72 random bits.
const ROOM_CODE_LENGTH: usize = 12;
const ROOM_CODE_RANDOM_BYTES: usize = 9;

/// Embedded room password: 8 base62 chars from 48 random bits.
const ROOM_PASSWORD_LENGTH: usize = 8;
const ROOM_PASSWORD_RANDOM_BYTES: usize = 6;

/// A way of provisioning and releasing a meeting for a session.
#[async_trait]
pub trait ConferencingBackend: Send + Sync {
    /// Which provider this backend implements.
    fn provider(&self) -> ConferencingProvider;

    /// Provision a meeting for `session`.
    async fn provision(&self, session: &Session) -> Result<MeetingBinding, MpError>;

    /// Release a meeting previously returned by [`provision`](Self::provision).
    async fn release(&self, meeting_id: &str) -> Result<(), MpError>;
}

// ============================================================================
// Embedded
// ============================================================================

/// In-house rooms. No configuration and no remote call.
pub struct EmbeddedBackend {
    room_base_url: String,
}

impl EmbeddedBackend {
    pub fn new(room_base_url: String) -> Self {
        Self {
            room_base_url: room_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ConferencingBackend for EmbeddedBackend {
    fn provider(&self) -> ConferencingProvider {
        ConferencingProvider::Embedded
    }

    #[instrument(skip_all, name = "mp.backend.embedded.provision", fields(session_id = %session.id))]
    async fn provision(&self, session: &Session) -> Result<MeetingBinding, MpError> {
        let room_code = generate_base62(ROOM_CODE_RANDOM_BYTES, ROOM_CODE_LENGTH)?;
        let password = generate_base62(ROOM_PASSWORD_RANDOM_BYTES, ROOM_PASSWORD_LENGTH)?;

        debug!(target: "mp.services.provider_selector", room = %room_code, "Embedded room allocated");

        Ok(MeetingBinding {
            join_url: format!("{}/{}", self.room_base_url, room_code),
            meeting_id: room_code,
            password,
            provider: ConferencingProvider::Embedded,
        })
    }

    async fn release(&self, meeting_id: &str) -> Result<(), MpError> {
        debug!(target: "mp.services.provider_selector", room = %meeting_id, "Embedded room released");
        Ok(())
    }
}

// ============================================================================
// External
// ============================================================================

/// External provider, through [`MeetingProvider`].
pub struct ExternalBackend {
    provider: Arc<dyn MeetingProvider>,
}

impl ExternalBackend {
    pub fn new(provider: Arc<dyn MeetingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ConferencingBackend for ExternalBackend {
    fn provider(&self) -> ConferencingProvider {
        ConferencingProvider::External
    }

    #[instrument(skip_all, name = "mp.backend.external.provision", fields(session_id = %session.id))]
    async fn provision(&self, session: &Session) -> Result<MeetingBinding, MpError> {
        let params = CreateMeetingParams {
            topic: session.title.clone(),
            start_time: session.scheduled_at,
            duration_minutes: session.duration_minutes,
            ..Default::default()
        };

        let handle = self.provider.create_meeting(&params).await?;

        Ok(MeetingBinding {
            meeting_id: handle.external_id,
            join_url: handle.join_url,
            password: handle.password,
            provider: ConferencingProvider::External,
        })
    }

    async fn release(&self, meeting_id: &str) -> Result<(), MpError> {
        self.provider.delete_meeting(meeting_id).await
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Chooses the backend for a session.
#[derive(Clone)]
pub struct ProviderSelector {
    embedded: Arc<EmbeddedBackend>,
    external: Arc<ExternalBackend>,
}

impl ProviderSelector {
    pub fn new(embedded_room_base_url: String, provider: Arc<dyn MeetingProvider>) -> Self {
        Self {
            embedded: Arc::new(EmbeddedBackend::new(embedded_room_base_url)),
            external: Arc::new(ExternalBackend::new(provider)),
        }
    }

    /// Backend for `provider`.
    pub fn for_provider(&self, provider: ConferencingProvider) -> Arc<dyn ConferencingBackend> {
        match provider {
            ConferencingProvider::Embedded => self.embedded.clone(),
            ConferencingProvider::External => self.external.clone(),
        }
    }

    /// Provision through the session's configured backend.
    pub async fn provision(&self, session: &Session) -> Result<MeetingBinding, MpError> {
        self.for_provider(session.conferencing_provider)
            .provision(session)
            .await
    }
}

/// CSPRNG base62 string of `length` chars drawn from `random_bytes` bytes (at most 16).
fn generate_base62(random_bytes: usize, length: usize) -> Result<String, MpError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    let buf = bytes
        .get_mut(..random_bytes)
        .ok_or_else(|| MpError::Internal("Random byte count out of range".to_string()))?;

    rng.fill(buf).map_err(|e| {
        tracing::error!(target: "mp.services.provider_selector", error = %e, "Failed to generate random bytes");
        MpError::Internal("RNG failure".to_string())
    })?;

    let mut value: u128 = 0;
    for &b in buf.iter() {
        value = (value << 8) | u128::from(b);
    }

    let mut code = Vec::with_capacity(length);
    for _ in 0..length {
        let idx = (value % 62) as usize;
        let ch = BASE62_CHARS
            .get(idx)
            .ok_or_else(|| MpError::Internal("Base62 index out of range".to_string()))?;
        code.push(*ch);
        value /= 62;
    }
    code.reverse();

    String::from_utf8(code).map_err(|_| MpError::Internal("Generated code was not UTF-8".to_string()))
}
