//! Meeting Provisioner Service Library
//!
//! Provisions video meetings for tutoring sessions and binds them onto the
//! session record:
//!
//! - Meeting CRUD against an external provider (OAuth account credentials)
//! - Embedded in-house rooms that need no remote call
//! - One-shot binding of a meeting onto a session, with reconciliation
//!   logging when the remote and local writes diverge
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! Provider tokens come from [`common::token_manager::TokenManager`].

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
