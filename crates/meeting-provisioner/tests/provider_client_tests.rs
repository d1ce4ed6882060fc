//! End-to-end tests with the real provider client against a stubbed provider.
//!
//! wiremock stands in for both the OAuth token endpoint and the meeting API,
//! so request counts show exactly which outbound calls each route makes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use meeting_provisioner::models::ConferencingProvider;
use meeting_provisioner::repositories::SessionStore;
use mp_test_utils::{session, TestServer};
use serde_json::{json, Value};
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_token(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "provider-token",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn meeting_json(id: u64) -> Value {
    json!({
        "id": id,
        "topic": "Linear algebra tutoring",
        "type": 2,
        "start_time": "2030-03-04T17:30:00Z",
        "duration": 50,
        "timezone": "UTC",
        "password": "k2Pq9",
        "join_url": format!("https://provider.test/j/{id}"),
        "start_url": format!("https://provider.test/s/{id}?zak=host-only")
    })
}

#[tokio::test]
async fn test_unauthenticated_request_makes_no_outbound_call() -> Result<()> {
    let provider = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_with_provider(&provider.uri(), &provider.uri()).await?;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .json(&json!({
            "topic": "Should never reach the provider",
            "startTime": "2030-03-04T17:30:00Z",
            "durationMinutes": 30
        }))
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    Ok(())
}

#[tokio::test]
async fn test_invalid_params_make_no_outbound_call() -> Result<()> {
    let provider = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_with_provider(&provider.uri(), &provider.uri()).await?;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .bearer_auth(server.token())
        .json(&json!({ "topic": "x", "startTime": "2030-03-04T17:30:00Z", "durationMinutes": 0 }))
        .send()
        .await?;

    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_create_uses_bearer_token_and_hides_host_url() -> Result<()> {
    let provider = MockServer::start().await;
    mount_token(&provider, 1).await;
    Mock::given(method("POST"))
        .and(path("/users/me/meetings"))
        .and(header("authorization", "Bearer provider-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(meeting_json(85_000_000_123)))
        .expect(1)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_with_provider(&provider.uri(), &provider.uri()).await?;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .bearer_auth(server.token())
        .json(&json!({
            "topic": "Linear algebra tutoring",
            "startTime": "2030-03-04T17:30:00Z",
            "durationMinutes": 50
        }))
        .send()
        .await?;

    assert_eq!(response.status(), 201);
    let text = response.text().await?;
    assert!(!text.contains("zak="));

    let body: Value = serde_json::from_str(&text)?;
    assert_eq!(body["meetingId"], "85000000123");
    assert_eq!(body["joinUrl"], "https://provider.test/j/85000000123");
    assert_eq!(body["password"], "k2Pq9");
    Ok(())
}

#[tokio::test]
async fn test_bind_persists_provider_meeting() -> Result<()> {
    let provider = MockServer::start().await;
    mount_token(&provider, 1).await;
    Mock::given(method("POST"))
        .and(path("/users/me/meetings"))
        .respond_with(ResponseTemplate::new(201).set_body_json(meeting_json(85_000_000_456)))
        .expect(1)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_with_provider(&provider.uri(), &provider.uri()).await?;
    let s = session(ConferencingProvider::External);
    server.insert_session(s.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/sessions/{}/meeting", server.url(), s.id))
        .bearer_auth(server.token())
        .send()
        .await?;
    assert_eq!(response.status(), 201);

    let stored = server.store().get(s.id).await?.unwrap();
    assert_eq!(stored.external_meeting_id.as_deref(), Some("85000000456"));
    assert_eq!(
        stored.meeting_join_url.as_deref(),
        Some("https://provider.test/j/85000000456")
    );
    assert_eq!(stored.external_meeting_password.as_deref(), Some("k2Pq9"));
    Ok(())
}

#[tokio::test]
async fn test_provider_failure_leaves_session_unbound() -> Result<()> {
    let provider = MockServer::start().await;
    mount_token(&provider, 1).await;
    Mock::given(method("POST"))
        .and(path("/users/me/meetings"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "code": 500, "message": "boom" })),
        )
        .expect(1)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_with_provider(&provider.uri(), &provider.uri()).await?;
    let s = session(ConferencingProvider::External);
    server.insert_session(s.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/sessions/{}/meeting", server.url(), s.id))
        .bearer_auth(server.token())
        .send()
        .await?;

    assert_eq!(response.status(), 502);
    assert!(!server.store().get(s.id).await?.unwrap().is_bound());
    Ok(())
}

#[tokio::test]
async fn test_delete_of_missing_meeting_is_success() -> Result<()> {
    let provider = MockServer::start().await;
    mount_token(&provider, 1).await;
    Mock::given(method("DELETE"))
        .and(path("/meetings/85000000999"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 3001,
            "message": "Meeting does not exist"
        })))
        .expect(1)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_with_provider(&provider.uri(), &provider.uri()).await?;
    let response = reqwest::Client::new()
        .delete(format!("{}/api/v1/meetings/85000000999", server.url()))
        .bearer_auth(server.token())
        .send()
        .await?;

    assert_eq!(response.status(), 204);
    Ok(())
}

#[tokio::test]
async fn test_missing_credentials_is_configuration_error() -> Result<()> {
    let provider = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&provider)
        .await;

    let server = TestServer::spawn_without_credentials(&provider.uri()).await?;
    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/meetings/85000000001", server.url()))
        .bearer_auth(server.token())
        .send()
        .await?;

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
    Ok(())
}
