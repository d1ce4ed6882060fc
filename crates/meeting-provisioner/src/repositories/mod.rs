//! Repository layer for the Meeting Provisioner.
//!
//! Handlers and services depend on the [`SessionStore`] trait; `main`
//! chooses the PostgreSQL or in-memory implementation.

pub mod sessions;

pub use sessions::{InMemorySessionStore, PgSessionStore, SessionStore};
