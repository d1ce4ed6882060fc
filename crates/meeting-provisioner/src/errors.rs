//! Meeting Provisioner error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Messages returned to callers are generic for infrastructure failures;
//! the underlying cause is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::token_manager::TokenError;
use serde::Serialize;
use thiserror::Error;

/// Meeting Provisioner error type.
///
/// Maps to HTTP status codes:
/// - Configuration, Database, Divergence, Internal: 500 Internal Server Error
/// - Authentication, Provider: 502 Bad Gateway
/// - Validation: 400 Bad Request
/// - InvalidToken: 401 Unauthorized
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
#[derive(Debug, Error)]
pub enum MpError {
    /// Provider credentials are missing. Not retryable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider refused the credential exchange, or it could not be completed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Missing or invalid meeting parameters. Raised before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-2xx response from the provider (other than a recovered 401).
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A remote meeting was created but the local binding could not be written.
    #[error("Binding divergence: {0}")]
    Divergence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MpError {
    /// HTTP status code this error is returned with.
    pub fn status_code(&self) -> u16 {
        match self {
            MpError::Configuration(_)
            | MpError::Database(_)
            | MpError::Divergence(_)
            | MpError::Internal(_) => 500,
            MpError::Authentication(_) | MpError::Provider { .. } => 502,
            MpError::Validation(_) => 400,
            MpError::InvalidToken(_) => 401,
            MpError::NotFound(_) => 404,
            MpError::Conflict(_) => 409,
        }
    }

    /// Bounded label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            MpError::Configuration(_) => "configuration",
            MpError::Authentication(_) => "authentication",
            MpError::Validation(_) => "validation",
            MpError::Provider { .. } => "provider",
            MpError::NotFound(_) => "not_found",
            MpError::Conflict(_) => "conflict",
            MpError::InvalidToken(_) => "invalid_token",
            MpError::Database(_) => "database",
            MpError::Divergence(_) => "divergence",
            MpError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for MpError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            MpError::Configuration(reason) => {
                tracing::error!(target: "mp.errors", reason = %reason, "Provider configuration missing");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIGURATION_ERROR",
                    "The meeting provider is not configured".to_string(),
                )
            }
            MpError::Authentication(reason) => {
                tracing::warn!(target: "mp.errors", reason = %reason, "Provider authentication failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_AUTHENTICATION_FAILED",
                    "Could not authenticate with the meeting provider".to_string(),
                )
            }
            MpError::Validation(reason) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", reason.clone())
            }
            MpError::Provider { status, message } => {
                // Upstream status stays in the logs
                tracing::warn!(target: "mp.errors", upstream_status = status, "Provider request failed");
                (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message.clone())
            }
            MpError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            MpError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            MpError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            MpError::Database(err) => {
                tracing::error!(target: "mp.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            MpError::Divergence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "BINDING_DIVERGENCE",
                "The meeting was created but could not be saved; it will be reconciled".to_string(),
            ),
            MpError::Internal(reason) => {
                tracing::error!(target: "mp.errors", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"meeting-provisioner\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<TokenError> for MpError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Configuration(reason) => MpError::Configuration(reason),
            TokenError::AuthenticationRejected(reason)
            | TokenError::HttpError(reason)
            | TokenError::InvalidResponse(reason) => MpError::Authentication(reason),
        }
    }
}

impl From<sqlx::Error> for MpError {
    fn from(err: sqlx::Error) -> Self {
        MpError::Database(err.to_string())
    }
}
