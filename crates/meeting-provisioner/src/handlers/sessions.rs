//! Session meeting binding handlers.

use crate::errors::MpError;
use crate::models::MeetingBinding;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

fn parse_session_id(raw: &str) -> Result<Uuid, MpError> {
    Uuid::parse_str(raw).map_err(|_| MpError::Validation("Invalid session id".to_string()))
}

/// `POST /api/v1/sessions/:id/meeting`
///
/// Provisions through the session's configured provider. The bind runs on its
/// own task, so a client disconnect does not abandon a half-finished binding.
#[instrument(skip_all, name = "mp.session.bind", fields(session_id = %session_id))]
pub async fn bind_session_meeting(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<MeetingBinding>), MpError> {
    let session_id = parse_session_id(&session_id)?;
    let binding = state.binder.bind_detached(session_id).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

/// `DELETE /api/v1/sessions/:id/meeting`
#[instrument(skip_all, name = "mp.session.unbind", fields(session_id = %session_id))]
pub async fn unbind_session_meeting(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, MpError> {
    let session_id = parse_session_id(&session_id)?;
    state.binder.unbind(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_id() {
        assert!(parse_session_id("8f14e45f-ceea-467f-a8a1-5f5b6c4a0d21").is_ok());
        assert!(matches!(
            parse_session_id("not-a-uuid"),
            Err(MpError::Validation(_))
        ));
    }
}
