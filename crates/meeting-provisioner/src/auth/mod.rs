//! Caller authentication.
//!
//! Callers present HS256 tokens signed with the shared application secret.

pub mod jwt;

pub use jwt::JwtValidator;
