#![allow(clippy::unwrap_used)]
// Integration tests for `AuthSession` token lifecycle using wiremock.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smartbox_api::{AuthSession, Error, Reseller};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Arc<AuthSession>) {
    let server = MockServer::start().await;
    let session = AuthSession::new(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        Reseller::default(),
        "user@example.com",
        SecretString::from("hunter2".to_owned()),
    );
    (server, Arc::new(session))
}

fn token_body(access: &str, expires_in: i64) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": format!("{access}-refresh"),
        "expires_in": expires_in,
        "token_type": "bearer",
    })
}

// ── Password grant ──────────────────────────────────────────────────

#[tokio::test]
async fn test_authenticate_sends_password_grant_with_reseller_credential() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(header(
            "authorization",
            format!("Basic {}", Reseller::default().basic_auth()).as_str(),
        ))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=user%40example.com"))
        .and(body_string_contains("password=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let token = session.authenticate().await.unwrap();
    assert_eq!(token.access_token().expose_secret(), "tok-1");
    assert!(session.current_token().is_some());
}

#[tokio::test]
async fn test_authenticate_rejected() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;

    let result = session.ensure_valid().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert!(session.current_token().is_none());
}

#[tokio::test]
async fn test_malformed_token_response_is_auth_error() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"nope": true})))
        .mount(&server)
        .await;

    let err = session.authenticate().await.unwrap_err();
    assert!(err.is_auth(), "got: {err:?}");
}

// ── ensure_valid ────────────────────────────────────────────────────

#[tokio::test]
async fn test_ensure_valid_reuses_fresh_token() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let first = session.ensure_valid().await.unwrap();
    let second = session.ensure_valid().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_ensure_valid_refreshes_token_inside_margin() {
    let (server, session) = setup().await;

    // Expires in 30s: inside the 60s margin, so the next call refreshes.
    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 30)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=tok-1-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-2", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    session.authenticate().await.unwrap();
    let token = session.ensure_valid().await.unwrap();
    assert_eq!(token.access_token().expose_secret(), "tok-2");

    // Fresh now; no further grants.
    let again = session.ensure_valid().await.unwrap();
    assert_eq!(again.access_token().expose_secret(), "tok-2");
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_password_grant() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 10)))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid refresh token"))
        .expect(1)
        .mount(&server)
        .await;

    session.authenticate().await.unwrap();
    let token = session.ensure_valid().await.unwrap();
    assert_eq!(token.access_token().expose_secret(), "tok-1");
}

#[tokio::test]
async fn test_explicit_refresh_error_is_token_refresh() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 3600)))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    session.authenticate().await.unwrap();
    let result = session.refresh().await;
    assert!(
        matches!(result, Err(Error::TokenRefresh { .. })),
        "expected TokenRefresh error, got: {result:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_grant() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("tok-1", 3600))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_valid().await })
        })
        .collect();

    for caller in callers {
        let token = caller.await.unwrap().unwrap();
        assert_eq!(token.access_token().expose_secret(), "tok-1");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failed_grant() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_string("maintenance")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_valid().await })
        })
        .collect();

    let started = std::time::Instant::now();
    for caller in callers {
        let result = caller.await.unwrap();
        assert!(
            matches!(result, Err(Error::Authentication { .. })),
            "expected Authentication error, got: {result:?}"
        );
    }
    assert!(started.elapsed() < Duration::from_millis(800));
    assert!(session.current_token().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_failed_refresh_fallback() {
    let (server, session) = setup().await;

    // First password grant succeeds with a token already inside the margin.
    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 10)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    session.authenticate().await.unwrap();

    let callers: Vec<_> = (0..6)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.ensure_valid().await })
        })
        .collect();

    for caller in callers {
        let err = caller.await.unwrap().unwrap_err();
        assert!(err.is_auth(), "got: {err:?}");
    }
}

#[tokio::test]
async fn test_failed_renewal_is_retried_by_later_callers() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    assert!(session.ensure_valid().await.is_err());
    let token = session.ensure_valid().await.unwrap();
    assert_eq!(token.access_token().expose_secret(), "tok-1");
}

#[tokio::test]
async fn test_out_of_range_expiry_is_auth_error() {
    let (server, session) = setup().await;

    Mock::given(method("POST"))
        .and(path("/client/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", i64::MAX)))
        .mount(&server)
        .await;

    let result = session.authenticate().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert!(session.current_token().is_none());
}
