//! Token and session fixtures.

use chrono::{TimeZone, Utc};
use common::jwt::UserClaims;
use jsonwebtoken::{encode, EncodingKey, Header};
use meeting_provisioner::models::{ConferencingProvider, Session};
use uuid::Uuid;

/// Secret the test server validates caller tokens with.
pub const TEST_JWT_SECRET: &str = "mp-test-utils-signing-secret";

/// Sign a caller token valid for one hour.
pub fn mint_token(sub: &str, roles: &[&str]) -> String {
    mint_token_with_secret(sub, roles, TEST_JWT_SECRET)
}

/// Sign a caller token with an arbitrary secret.
pub fn mint_token_with_secret(sub: &str, roles: &[&str], secret: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = UserClaims {
        sub: sub.to_string(),
        exp: now + 3600,
        iat: now,
        roles: roles.iter().map(|r| (*r).to_string()).collect(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encoding should succeed")
}

/// An unbound, fully scheduled session.
pub fn session(provider: ConferencingProvider) -> Session {
    Session {
        id: Uuid::new_v4(),
        title: Some("Linear algebra tutoring".to_string()),
        scheduled_at: Some(
            Utc.with_ymd_and_hms(2030, 3, 4, 17, 30, 0)
                .single()
                .expect("valid timestamp"),
        ),
        duration_minutes: Some(50),
        conferencing_provider: provider,
        external_meeting_id: None,
        external_meeting_password: None,
        meeting_join_url: None,
    }
}
