//! Common utilities and types shared across the meeting provisioning services.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, clock skew, caller claims)
pub mod jwt;

/// Module for OAuth 2.0 account-credentials token management with single-flight refresh
pub mod token_manager;
