//! Authentication middleware for protected routes.
//!
//! Rejects the request before any handler runs, so an unauthenticated call
//! never reaches the meeting provider.

use crate::auth::JwtValidator;
use crate::errors::MpError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_validator: Arc<JwtValidator>,
}

/// Validate the `Authorization: Bearer <token>` header and store the
/// caller's `UserClaims` in request extensions.
///
/// Returns 401 with `WWW-Authenticate` if the token is missing or invalid.
#[instrument(skip_all, name = "mp.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, MpError> {
    let token = bearer_token(&req)?;
    let claims = state.jwt_validator.validate(token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Result<&str, MpError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "mp.middleware.auth", "Missing Authorization header");
            MpError::InvalidToken("Missing Authorization header".to_string())
        })?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "mp.middleware.auth", "Invalid Authorization header format");
            MpError::InvalidToken("Invalid Authorization header format".to_string())
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use chrono::Utc;
    use common::jwt::UserClaims;
    use common::secret::SecretString;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;

    const SECRET: &str = "middleware-test-secret";

    async fn whoami(Extension(claims): Extension<UserClaims>) -> String {
        claims.sub
    }

    fn app() -> Router {
        let auth_state = Arc::new(AuthState {
            jwt_validator: Arc::new(JwtValidator::new(&SecretString::from(SECRET), 300)),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    fn token() -> String {
        let now = Utc::now().timestamp();
        let claims = UserClaims {
            sub: "learner-7".to_string(),
            exp: now + 600,
            iat: now,
            roles: vec![],
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn call(auth: Option<String>) -> axum::response::Response {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_passes_claims_to_handler() {
        let response = call(Some(format!("Bearer {}", token()))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(body.as_ref(), b"learner-7");
    }

    #[tokio::test]
    async fn test_missing_header_is_401_with_challenge() {
        let response = call(None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_401() {
        let response = call(Some(format!("Basic {}", token()))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = call(Some("Bearer ".to_string())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_token_is_401() {
        let response = call(Some("Bearer not.a.token".to_string())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
