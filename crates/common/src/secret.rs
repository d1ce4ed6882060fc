//! Secret types for values that must never reach logs or client responses.
//!
//! Re-exports [`secrecy`] wrappers. Anything derived with `Debug` that holds a
//! [`SecretString`] prints `[REDACTED]` for that field, and the wrapper does
//! not implement `Serialize`, so a secret cannot be written into a JSON
//! response by accident.
//!
//! Used in this workspace for:
//! - the provider OAuth client secret
//! - provider bearer tokens held by the token manager
//! - the meeting host-control URL returned by the provider
//! - the HMAC key that verifies caller JWTs
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ProviderCredentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = ProviderCredentials {
//!     client_id: "svc-tutoring".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("s3cr3t"));
//! assert_eq!(creds.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
