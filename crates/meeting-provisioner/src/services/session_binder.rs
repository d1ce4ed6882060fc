//! Session meeting binding.
//!
//! Orchestrates: load session, check it, provision through the selected
//! backend, then persist the binding in one guarded write.
//!
//! # Consistency
//!
//! The remote call and the local write are not transactional. Outcomes:
//! - provisioning fails: nothing is written
//! - write finds the session already bound (another process won): the new
//!   remote meeting is released best-effort and the caller gets Conflict
//! - write fails: the remote meeting is left in place and logged on the
//!   `mp.reconciliation` target for follow-up
//!
//! A bound session is never re-provisioned; callers must unbind first.

use crate::errors::MpError;
use crate::models::{ConferencingProvider, MeetingBinding, Session};
use crate::observability::metrics;
use crate::repositories::SessionStore;
use crate::services::provider_selector::ProviderSelector;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Binds provisioned meetings onto sessions.
pub struct SessionMeetingBinder {
    store: Arc<dyn SessionStore>,
    selector: ProviderSelector,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Marks a session as being worked on; released on drop.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    session_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

impl SessionMeetingBinder {
    pub fn new(store: Arc<dyn SessionStore>, selector: ProviderSelector) -> Self {
        Self {
            store,
            selector,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn begin(&self, session_id: Uuid) -> Result<InFlightGuard<'_>, MpError> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id);

        if !inserted {
            debug!(target: "mp.services.session_binder", session_id = %session_id, "Session already has a binding operation in flight");
            return Err(MpError::Conflict(
                "A meeting operation for this session is already in progress".to_string(),
            ));
        }

        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            session_id,
        })
    }

    /// Provision a meeting for a session and persist the binding.
    ///
    /// # Errors
    ///
    /// - `MpError::NotFound` if the session does not exist
    /// - `MpError::Conflict` if the session is already bound or being bound
    /// - `MpError::Validation` if title, schedule, or duration is missing
    /// - provider errors from the external backend, with nothing persisted
    /// - `MpError::Divergence` if the meeting was created but not persisted
    #[instrument(skip_all, name = "mp.binder.bind", fields(session_id = %session_id, provider = tracing::field::Empty))]
    pub async fn bind(&self, session_id: Uuid) -> Result<MeetingBinding, MpError> {
        let _guard = self.begin(session_id)?;

        let session = self.load(session_id).await?;
        let provider = session.conferencing_provider;
        tracing::Span::current().record("provider", provider.as_str());

        if session.is_bound() {
            metrics::record_session_bind("conflict", provider.as_str());
            return Err(MpError::Conflict(
                "Session already has a meeting".to_string(),
            ));
        }

        validate_session(&session).inspect_err(|_| {
            metrics::record_session_bind("error", provider.as_str());
        })?;

        let backend = self.selector.for_provider(provider);
        let binding = backend.provision(&session).await.inspect_err(|e| {
            warn!(target: "mp.services.session_binder", error_kind = e.kind(), error = %e, "Provisioning failed; session left unbound");
            metrics::record_session_bind("error", provider.as_str());
        })?;

        match self.store.bind_if_unbound(session_id, &binding).await {
            Ok(true) => {
                info!(
                    target: "mp.services.session_binder",
                    meeting_id = %binding.meeting_id,
                    "Meeting bound to session"
                );
                metrics::record_session_bind("success", provider.as_str());
                Ok(binding)
            }
            Ok(false) => {
                warn!(
                    target: "mp.services.session_binder",
                    meeting_id = %binding.meeting_id,
                    "Session was bound concurrently; releasing new meeting"
                );
                if let Err(e) = backend.release(&binding.meeting_id).await {
                    error!(
                        target: "mp.reconciliation",
                        session_id = %session_id,
                        meeting_id = %binding.meeting_id,
                        provider = provider.as_str(),
                        error = %e,
                        "Orphaned meeting could not be released; reconciliation required"
                    );
                    metrics::record_binding_divergence(provider.as_str());
                }
                metrics::record_session_bind("conflict", provider.as_str());
                Err(MpError::Conflict(
                    "Session already has a meeting".to_string(),
                ))
            }
            Err(e) => {
                error!(
                    target: "mp.reconciliation",
                    session_id = %session_id,
                    meeting_id = %binding.meeting_id,
                    provider = provider.as_str(),
                    error = %e,
                    "Meeting provisioned but binding not persisted; reconciliation required"
                );
                metrics::record_binding_divergence(provider.as_str());
                metrics::record_session_bind("divergence", provider.as_str());
                Err(MpError::Divergence(format!(
                    "session {} meeting {}",
                    session_id, binding.meeting_id
                )))
            }
        }
    }

    /// Run [`bind`](Self::bind) on its own task.
    ///
    /// The task runs to completion even if the caller stops waiting, so a
    /// remote meeting created mid-request is still persisted.
    pub async fn bind_detached(self: &Arc<Self>, session_id: Uuid) -> Result<MeetingBinding, MpError> {
        let binder = Arc::clone(self);
        tokio::spawn(async move { binder.bind(session_id).await })
            .await
            .map_err(|e| {
                error!(target: "mp.services.session_binder", error = %e, "Bind task failed");
                MpError::Internal("Bind task failed".to_string())
            })?
    }

    /// Release a session's meeting and clear its binding fields.
    ///
    /// An unbound session is left as is.
    ///
    /// # Errors
    ///
    /// - `MpError::NotFound` if the session does not exist
    /// - `MpError::Conflict` if a bind for the session is in flight
    /// - provider errors if the remote delete fails (binding kept)
    #[instrument(skip_all, name = "mp.binder.unbind", fields(session_id = %session_id))]
    pub async fn unbind(&self, session_id: Uuid) -> Result<(), MpError> {
        let _guard = self.begin(session_id)?;

        let session = self.load(session_id).await?;
        let Some(meeting_id) = session.external_meeting_id.as_deref() else {
            debug!(target: "mp.services.session_binder", "Session has no meeting to release");
            return Ok(());
        };

        self.selector
            .for_provider(session.conferencing_provider)
            .release(meeting_id)
            .await?;

        if let Err(e) = self.store.clear_binding(session_id, meeting_id).await {
            error!(
                target: "mp.reconciliation",
                session_id = %session_id,
                meeting_id = %meeting_id,
                provider = session.conferencing_provider.as_str(),
                error = %e,
                "Meeting released but binding not cleared; reconciliation required"
            );
            return Err(e);
        }

        info!(target: "mp.services.session_binder", meeting_id = %meeting_id, "Meeting unbound from session");
        Ok(())
    }

    /// Delete an external meeting and clear every session binding to it.
    ///
    /// # Errors
    ///
    /// Provider errors from the remote delete (404 is success), or a
    /// database error while clearing bindings.
    #[instrument(skip_all, name = "mp.binder.release_meeting", fields(meeting_id = %meeting_id))]
    pub async fn release_meeting(&self, meeting_id: &str) -> Result<(), MpError> {
        self.selector
            .for_provider(ConferencingProvider::External)
            .release(meeting_id)
            .await?;

        let cleared = self.store.clear_bindings_for_meeting(meeting_id).await?;
        if cleared > 0 {
            info!(
                target: "mp.services.session_binder",
                sessions_cleared = cleared,
                "Cleared session bindings for deleted meeting"
            );
        }
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Session, MpError> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| MpError::NotFound("Session not found".to_string()))
    }
}

/// Check the scheduling fields a meeting is derived from.
fn validate_session(session: &Session) -> Result<(), MpError> {
    if session
        .title
        .as_deref()
        .map_or(true, |t| t.trim().is_empty())
    {
        return Err(MpError::Validation("Session has no title".to_string()));
    }
    if session.scheduled_at.is_none() {
        return Err(MpError::Validation(
            "Session has no scheduled start time".to_string(),
        ));
    }
    match session.duration_minutes {
        Some(d) if d > 0 => Ok(()),
        _ => Err(MpError::Validation(
            "Session has no valid duration".to_string(),
        )),
    }
}
