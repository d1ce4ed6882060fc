//! JWT validation for caller tokens.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted
//! - `exp` is enforced; `iat` is checked with clock skew tolerance
//! - Every failure maps to the same generic message

use crate::errors::MpError;
use common::jwt::{check_token_size, validate_iat, UserClaims};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Validates caller tokens against the shared signing secret.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    clock_skew: Duration,
}

impl JwtValidator {
    /// Create a validator.
    ///
    /// A negative `clock_skew_seconds` is treated as zero.
    pub fn new(secret: &SecretString, clock_skew_seconds: i64) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            clock_skew: Duration::from_secs(u64::try_from(clock_skew_seconds).unwrap_or(0)),
        }
    }

    /// Validate a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `MpError::InvalidToken` for every failure.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<UserClaims, MpError> {
        check_token_size(token).map_err(|e| {
            tracing::debug!(target: "mp.auth.jwt", error = ?e, "Token size check failed");
            invalid_token()
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<UserClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "mp.auth.jwt", error = %e, "Token verification failed");
                invalid_token()
            })?
            .claims;

        validate_iat(claims.iat, self.clock_skew).map_err(|e| {
            tracing::debug!(target: "mp.auth.jwt", error = ?e, "Token iat validation failed");
            invalid_token()
        })?;

        Ok(claims)
    }
}

fn invalid_token() -> MpError {
    MpError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
}
