//! Session storage for meeting bindings.
//!
//! Sessions are created and scheduled by the surrounding application; this
//! store only reads them and transitions the binding columns.
//!
//! # Binding writes
//!
//! - [`SessionStore::bind_if_unbound`] writes the whole binding tuple in one
//!   statement, guarded by `external_meeting_id IS NULL`, so two binders
//!   racing on one session cannot both persist.
//! - Clearing is guarded by the meeting id being cleared, so a stale unbind
//!   cannot wipe a newer binding.

use crate::errors::MpError;
use crate::models::{ConferencingProvider, MeetingBinding, Session};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

/// Storage operations on the session binding fields.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session.
    async fn get(&self, id: Uuid) -> Result<Option<Session>, MpError>;

    /// Persist `binding` only if the session has no binding yet.
    ///
    /// Returns `false` if the session is missing or already bound.
    async fn bind_if_unbound(&self, id: Uuid, binding: &MeetingBinding) -> Result<bool, MpError>;

    /// Clear the binding of `id` if it still references `meeting_id`.
    async fn clear_binding(&self, id: Uuid, meeting_id: &str) -> Result<bool, MpError>;

    /// Clear every external binding that references `meeting_id`.
    ///
    /// Returns the number of sessions cleared.
    async fn clear_bindings_for_meeting(&self, meeting_id: &str) -> Result<u64, MpError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), MpError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row_to_session(row: &PgRow) -> Result<Session, MpError> {
    let provider: String = row.try_get("conferencing_provider")?;
    let conferencing_provider = provider.parse().map_err(|e: String| {
        tracing::error!(target: "mp.repositories.sessions", error = %e, "Unknown provider in sessions row");
        MpError::Database(e)
    })?;

    Ok(Session {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        scheduled_at: row.try_get("scheduled_at")?,
        duration_minutes: row.try_get("duration_minutes")?,
        conferencing_provider,
        external_meeting_id: row.try_get("external_meeting_id")?,
        external_meeting_password: row.try_get("external_meeting_password")?,
        meeting_join_url: row.try_get("meeting_join_url")?,
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip_all, name = "mp.repo.get_session", fields(session_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<Session>, MpError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, scheduled_at, duration_minutes, conferencing_provider,
                   external_meeting_id, external_meeting_password, meeting_join_url
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_row_to_session).transpose()
    }

    #[instrument(skip_all, name = "mp.repo.bind_session", fields(session_id = %id))]
    async fn bind_if_unbound(&self, id: Uuid, binding: &MeetingBinding) -> Result<bool, MpError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET external_meeting_id = $2,
                external_meeting_password = $3,
                meeting_join_url = $4,
                conferencing_provider = $5,
                updated_at = NOW()
            WHERE id = $1 AND external_meeting_id IS NULL
            "#,
        )
        .bind(id)
        .bind(&binding.meeting_id)
        .bind(&binding.password)
        .bind(&binding.join_url)
        .bind(binding.provider.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "mp.repo.clear_binding", fields(session_id = %id))]
    async fn clear_binding(&self, id: Uuid, meeting_id: &str) -> Result<bool, MpError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET external_meeting_id = NULL,
                external_meeting_password = NULL,
                meeting_join_url = NULL,
                updated_at = NOW()
            WHERE id = $1 AND external_meeting_id = $2
            "#,
        )
        .bind(id)
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "mp.repo.clear_bindings_for_meeting")]
    async fn clear_bindings_for_meeting(&self, meeting_id: &str) -> Result<u64, MpError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET external_meeting_id = NULL,
                external_meeting_password = NULL,
                meeting_join_url = NULL,
                updated_at = NOW()
            WHERE external_meeting_id = $1 AND conferencing_provider = 'external'
            "#,
        )
        .bind(meeting_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), MpError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local session store for development and tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session (stands in for the owning application).
    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.id, session);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: Uuid) -> Result<Option<Session>, MpError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn bind_if_unbound(&self, id: Uuid, binding: &MeetingBinding) -> Result<bool, MpError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if !session.is_bound() => {
                session.external_meeting_id = Some(binding.meeting_id.clone());
                session.external_meeting_password = Some(binding.password.clone());
                session.meeting_join_url = Some(binding.join_url.clone());
                session.conferencing_provider = binding.provider;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_binding(&self, id: Uuid, meeting_id: &str) -> Result<bool, MpError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.external_meeting_id.as_deref() == Some(meeting_id) => {
                clear(session);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_bindings_for_meeting(&self, meeting_id: &str) -> Result<u64, MpError> {
        let mut sessions = self.sessions.write().await;
        let mut cleared = 0;
        for session in sessions.values_mut().filter(|s| {
            s.conferencing_provider == ConferencingProvider::External
                && s.external_meeting_id.as_deref() == Some(meeting_id)
        }) {
            clear(session);
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn ping(&self) -> Result<(), MpError> {
        Ok(())
    }
}

fn clear(session: &mut Session) {
    session.external_meeting_id = None;
    session.external_meeting_password = None;
    session.meeting_join_url = None;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn session(provider: ConferencingProvider) -> Session {
        Session {
            id: Uuid::new_v4(),
            title: Some("Essay workshop".to_string()),
            scheduled_at: None,
            duration_minutes: Some(30),
            conferencing_provider: provider,
            external_meeting_id: None,
            external_meeting_password: None,
            meeting_join_url: None,
        }
    }

    fn binding(id: &str) -> MeetingBinding {
        MeetingBinding {
            meeting_id: id.to_string(),
            join_url: format!("https://provider.test/j/{id}"),
            password: "pw".to_string(),
            provider: ConferencingProvider::External,
        }
    }

    #[tokio::test]
    async fn test_bind_only_once() {
        let store = InMemorySessionStore::new();
        let s = session(ConferencingProvider::External);
        store.insert(s.clone()).await;

        assert!(store.bind_if_unbound(s.id, &binding("111")).await.unwrap());
        assert!(!store.bind_if_unbound(s.id, &binding("222")).await.unwrap());

        let stored = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(stored.external_meeting_id.as_deref(), Some("111"));
        assert_eq!(
            stored.meeting_join_url.as_deref(),
            Some("https://provider.test/j/111")
        );
    }

    #[tokio::test]
    async fn test_bind_missing_session_is_false() {
        let store = InMemorySessionStore::new();
        assert!(!store
            .bind_if_unbound(Uuid::new_v4(), &binding("111"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_clear_binding_requires_matching_meeting() {
        let store = InMemorySessionStore::new();
        let s = session(ConferencingProvider::External);
        store.insert(s.clone()).await;
        store.bind_if_unbound(s.id, &binding("111")).await.unwrap();

        assert!(!store.clear_binding(s.id, "999").await.unwrap());
        assert!(store.clear_binding(s.id, "111").await.unwrap());

        let stored = store.get(s.id).await.unwrap().unwrap();
        assert!(!stored.is_bound());
        assert!(stored.meeting_join_url.is_none());
        assert!(stored.external_meeting_password.is_none());
    }

    #[tokio::test]
    async fn test_clear_bindings_for_meeting_only_touches_external() {
        let store = InMemorySessionStore::new();
        let external = session(ConferencingProvider::External);
        let embedded = session(ConferencingProvider::Embedded);
        store.insert(external.clone()).await;
        store.insert(embedded.clone()).await;

        store
            .bind_if_unbound(external.id, &binding("555"))
            .await
            .unwrap();
        let mut embedded_binding = binding("555");
        embedded_binding.provider = ConferencingProvider::Embedded;
        store
            .bind_if_unbound(embedded.id, &embedded_binding)
            .await
            .unwrap();

        assert_eq!(store.clear_bindings_for_meeting("555").await.unwrap(), 1);
        assert!(!store.get(external.id).await.unwrap().unwrap().is_bound());
        assert!(store.get(embedded.id).await.unwrap().unwrap().is_bound());
    }
}
