//! Data models for the Meeting Provisioner.
//!
//! Request and response bodies crossing the HTTP boundary use camelCase.
//! [`MeetingHandle`] is provider-facing only and is never serialized.

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Conferencing provider
// ============================================================================

/// Conferencing choice configured on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConferencingProvider {
    /// In-house rooms; no remote call.
    Embedded,
    /// External meeting provider API.
    External,
}

impl ConferencingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConferencingProvider::Embedded => "embedded",
            ConferencingProvider::External => "external",
        }
    }
}

impl fmt::Display for ConferencingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConferencingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embedded" => Ok(ConferencingProvider::Embedded),
            "external" => Ok(ConferencingProvider::External),
            other => Err(format!("unknown conferencing provider '{other}'")),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// The subset of a tutoring session this service reads and writes.
///
/// Scheduling fields are owned by the surrounding application and may be
/// missing on a draft session; binding checks them before provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub title: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub conferencing_provider: ConferencingProvider,
    pub external_meeting_id: Option<String>,
    pub external_meeting_password: Option<String>,
    pub meeting_join_url: Option<String>,
}

impl Session {
    /// Whether a meeting identity is already persisted on this session.
    pub fn is_bound(&self) -> bool {
        self.external_meeting_id.is_some()
    }
}

/// Result of provisioning a meeting for a session.
///
/// The same shape for every provider, and the exact tuple persisted onto
/// the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingBinding {
    pub meeting_id: String,
    pub join_url: String,
    pub password: String,
    pub provider: ConferencingProvider,
}

// ============================================================================
// Provider meeting
// ============================================================================

/// A meeting as returned by the external provider.
///
/// `host_control_url` starts the meeting as host. It is a `SecretString` so
/// it is redacted from Debug output, and this type deliberately has no
/// `Serialize` impl.
#[derive(Debug, Clone)]
pub struct MeetingHandle {
    pub external_id: String,
    pub join_url: String,
    pub password: String,
    pub topic: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub host_control_url: SecretString,
}

/// Meeting settings sent on create.
///
/// Field names follow the provider's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingSettings {
    pub host_video: bool,
    pub participant_video: bool,
    pub join_before_host: bool,
    pub mute_upon_entry: bool,
    pub watermark: bool,
    pub use_pmi: bool,
    /// 0 = automatic approval, 1 = manual, 2 = no registration required.
    pub approval_type: u8,
    /// `both`, `telephony`, or `voip`.
    pub audio: String,
    /// `local`, `cloud`, or `none`.
    pub auto_recording: String,
}

impl Default for MeetingSettings {
    fn default() -> Self {
        Self {
            host_video: true,
            participant_video: true,
            join_before_host: true,
            mute_upon_entry: false,
            watermark: false,
            use_pmi: false,
            approval_type: 2,
            audio: "both".to_string(),
            auto_recording: "none".to_string(),
        }
    }
}

impl MeetingSettings {
    /// Defaults with caller overrides applied on top.
    pub fn with_overrides(overrides: Option<&MeetingSettingsOverrides>) -> Self {
        let mut settings = Self::default();
        let Some(o) = overrides else {
            return settings;
        };

        if let Some(v) = o.host_video {
            settings.host_video = v;
        }
        if let Some(v) = o.participant_video {
            settings.participant_video = v;
        }
        if let Some(v) = o.join_before_host {
            settings.join_before_host = v;
        }
        if let Some(v) = o.mute_upon_entry {
            settings.mute_upon_entry = v;
        }
        if let Some(v) = o.watermark {
            settings.watermark = v;
        }
        if let Some(v) = o.use_pmi {
            settings.use_pmi = v;
        }
        if let Some(v) = o.approval_type {
            settings.approval_type = v;
        }
        if let Some(v) = &o.audio {
            settings.audio.clone_from(v);
        }
        if let Some(v) = &o.auto_recording {
            settings.auto_recording.clone_from(v);
        }
        settings
    }
}

/// Caller-supplied settings. Unset fields keep the defaults on create and
/// are left untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSettingsOverrides {
    pub host_video: Option<bool>,
    pub participant_video: Option<bool>,
    pub join_before_host: Option<bool>,
    pub mute_upon_entry: Option<bool>,
    pub watermark: Option<bool>,
    pub use_pmi: Option<bool>,
    pub approval_type: Option<u8>,
    pub audio: Option<String>,
    pub auto_recording: Option<String>,
}

/// Parameters for creating a provider meeting.
///
/// `topic`, `start_time`, and `duration_minutes` are required; they are
/// optional here so that their absence is reported as a validation error
/// rather than a body parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingParams {
    pub topic: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub timezone: Option<String>,
    pub password: Option<String>,
    pub agenda: Option<String>,
    pub settings: Option<MeetingSettingsOverrides>,
}

/// Partial update for a provider meeting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeetingParams {
    pub topic: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub timezone: Option<String>,
    pub password: Option<String>,
    pub agenda: Option<String>,
    pub settings: Option<MeetingSettingsOverrides>,
}

impl UpdateMeetingParams {
    pub fn is_empty(&self) -> bool {
        self.topic.is_none()
            && self.start_time.is_none()
            && self.duration_minutes.is_none()
            && self.timezone.is_none()
            && self.password.is_none()
            && self.agenda.is_none()
            && self.settings.is_none()
    }
}

// ============================================================================
// API responses
// ============================================================================

/// Sanitized meeting returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingResponse {
    pub meeting_id: String,
    pub join_url: String,
    pub password: String,
}

impl From<&MeetingHandle> for MeetingResponse {
    fn from(handle: &MeetingHandle) -> Self {
        Self {
            meeting_id: handle.external_id.clone(),
            join_url: handle.join_url.clone(),
            password: handle.password.clone(),
        }
    }
}

/// Readiness probe body.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_store: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn handle() -> MeetingHandle {
        MeetingHandle {
            external_id: "85746065432".to_string(),
            join_url: "https://provider.test/j/85746065432".to_string(),
            password: "x7Yq2".to_string(),
            topic: "Algebra".to_string(),
            start_time: Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap(),
            duration_minutes: 60,
            host_control_url: SecretString::from("https://provider.test/s/85746065432?zak=abc"),
        }
    }

    #[test]
    fn test_provider_round_trips_through_str() {
        for p in [ConferencingProvider::Embedded, ConferencingProvider::External] {
            assert_eq!(p.as_str().parse::<ConferencingProvider>().unwrap(), p);
        }
        assert!("zoom".parse::<ConferencingProvider>().is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = MeetingSettings::with_overrides(None);

        assert!(settings.host_video);
        assert!(settings.participant_video);
        assert!(settings.join_before_host);
        assert!(!settings.mute_upon_entry);
        assert!(!settings.watermark);
        assert!(!settings.use_pmi);
        assert_eq!(settings.approval_type, 2);
        assert_eq!(settings.audio, "both");
        assert_eq!(settings.auto_recording, "none");
    }

    #[test]
    fn test_settings_overrides_only_touch_set_fields() {
        let overrides = MeetingSettingsOverrides {
            mute_upon_entry: Some(true),
            auto_recording: Some("cloud".to_string()),
            ..Default::default()
        };

        let settings = MeetingSettings::with_overrides(Some(&overrides));
        assert!(settings.mute_upon_entry);
        assert_eq!(settings.auto_recording, "cloud");
        assert!(settings.host_video);
        assert_eq!(settings.audio, "both");
    }

    #[test]
    fn test_create_params_parse_camel_case() {
        let json = r#"{"topic":"Algebra","startTime":"2025-06-01T15:00:00Z","durationMinutes":60,"settings":{"muteUponEntry":true}}"#;
        let params: CreateMeetingParams = serde_json::from_str(json).unwrap();

        assert_eq!(params.topic.as_deref(), Some("Algebra"));
        assert_eq!(params.duration_minutes, Some(60));
        assert_eq!(
            params.start_time,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap())
        );
        assert_eq!(params.settings.unwrap().mute_upon_entry, Some(true));
    }

    #[test]
    fn test_update_params_empty() {
        assert!(UpdateMeetingParams::default().is_empty());
        let params: UpdateMeetingParams = serde_json::from_str(r#"{"agenda":"ch. 4"}"#).unwrap();
        assert!(!params.is_empty());
    }

    #[test]
    fn test_meeting_response_has_no_host_url() {
        let response = MeetingResponse::from(&handle());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["meetingId"], "85746065432");
        assert_eq!(json.as_object().unwrap().len(), 3);
        assert!(!json.to_string().contains("zak=abc"));
    }

    #[test]
    fn test_handle_debug_redacts_host_url() {
        let debug_str = format!("{:?}", handle());
        assert!(!debug_str.contains("zak=abc"));
    }

    #[test]
    fn test_binding_serializes_provider_lowercase() {
        let binding = MeetingBinding {
            meeting_id: "r-1".to_string(),
            join_url: "https://meet.local/r-1".to_string(),
            password: "pw".to_string(),
            provider: ConferencingProvider::Embedded,
        };

        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["provider"], "embedded");
        assert_eq!(json["joinUrl"], "https://meet.local/r-1");
    }
}
