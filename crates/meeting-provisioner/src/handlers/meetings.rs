//! Meeting CRUD handlers.
//!
//! Thin wrappers over the [`MeetingProvider`](crate::services::MeetingProvider).
//! Responses carry only `meetingId`, `joinUrl`, and `password`.

use crate::errors::MpError;
use crate::models::{CreateMeetingParams, MeetingResponse, UpdateMeetingParams};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, instrument};

/// Parse a JSON body, mapping failures to 400 instead of axum's 422.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, MpError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "mp.handlers.meetings", error = %e, "Invalid request body");
        MpError::Validation("Invalid request body".to_string())
    })
}

/// `POST /api/v1/meetings`
#[instrument(skip_all, name = "mp.meeting.create")]
pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<MeetingResponse>), MpError> {
    let params: CreateMeetingParams = parse_body(&body)?;
    let handle = state.provider.create_meeting(&params).await?;

    info!(target: "mp.handlers.meetings", meeting_id = %handle.external_id, "Meeting created");
    Ok((StatusCode::CREATED, Json(MeetingResponse::from(&handle))))
}

/// `GET /api/v1/meetings/:id`
#[instrument(skip_all, name = "mp.meeting.get", fields(meeting_id = %meeting_id))]
pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> Result<Json<MeetingResponse>, MpError> {
    let handle = state.provider.get_meeting(&meeting_id).await?;
    Ok(Json(MeetingResponse::from(&handle)))
}

/// `PATCH /api/v1/meetings/:id`
#[instrument(skip_all, name = "mp.meeting.update", fields(meeting_id = %meeting_id))]
pub async fn update_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, MpError> {
    let params: UpdateMeetingParams = parse_body(&body)?;
    state.provider.update_meeting(&meeting_id, &params).await?;

    info!(target: "mp.handlers.meetings", "Meeting updated");
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/meetings/:id`
///
/// Idempotent. Sessions bound to the meeting lose their binding.
#[instrument(skip_all, name = "mp.meeting.delete", fields(meeting_id = %meeting_id))]
pub async fn delete_meeting(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<String>,
) -> Result<StatusCode, MpError> {
    state.binder.release_meeting(&meeting_id).await?;

    info!(target: "mp.handlers.meetings", "Meeting deleted");
    Ok(StatusCode::NO_CONTENT)
}
