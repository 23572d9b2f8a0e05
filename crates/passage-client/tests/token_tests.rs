/*
[INPUT]:  Mock refresh, profile and rotation responses
[OUTPUT]: Test results for token lifecycle and the authenticated request path
[POS]:    Integration tests - token store and identity client
[UPDATE]: When refresh, retry or rotation rules change
*/

mod common;

use std::time::Duration;

use common::{email_user, envelope, fresh_token, memory_storage, session_for, setup_mock_server, token_expiring_in};
use futures_util::future::join_all;
use passage_client::auth::ACCESS_TOKEN_KEY;
use passage_client::{KeyValueStorage, PassageError, TokenEvent};
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_concurrent_refreshes_share_one_request() {
    let server = setup_mock_server().await;
    let refreshed = fresh_token("user-1");
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(json!({"accessToken": refreshed.clone()})))
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let tokens = session.tokens().clone();

    let results = join_all((0..5).map(|_| {
        let tokens = tokens.clone();
        async move { tokens.refresh().await }
    }))
    .await;

    for result in results {
        assert_eq!(result.as_deref(), Some(refreshed.as_str()));
    }
    assert_eq!(tokens.get_token(), Some(refreshed));
}

#[tokio::test]
async fn test_failed_refresh_clears_everything() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "refresh expired"})))
        .expect(1)
        .mount(&server)
        .await;

    let storage = memory_storage();
    let session = session_for(&server, storage.clone());
    let tokens = session.tokens();
    tokens.set_token(Some(fresh_token("user-1")));
    let mut events = tokens.subscribe();

    assert!(tokens.refresh().await.is_none());
    assert!(tokens.get_token().is_none());
    assert!(storage.get(ACCESS_TOKEN_KEY).is_none());
    assert!(!tokens.has_scheduled_refresh());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&TokenEvent::RefreshFailed));
}

#[tokio::test]
async fn test_valid_token_schedules_proactive_refresh() {
    let server = setup_mock_server().await;
    let session = session_for(&server, memory_storage());

    session.tokens().set_token(Some(fresh_token("user-1")));
    assert!(session.tokens().has_scheduled_refresh());

    session.tokens().clear();
    assert!(!session.tokens().has_scheduled_refresh());
}

#[tokio::test]
async fn test_token_inside_buffer_is_refreshed_before_profile_call() {
    let server = setup_mock_server().await;
    let stale = token_expiring_in("user-1", 60);
    let refreshed = fresh_token("user-1");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"accessToken": refreshed.clone()}))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .and(header("authorization", format!("Bearer {refreshed}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"user": email_user("user-1")}))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    session.tokens().set_token(Some(stale));

    let user = assert_ok!(session.client().get_profile().await);
    assert_eq!(user.id, "user-1");
}

#[tokio::test]
async fn test_unauthorized_profile_is_retried_once_after_refresh() {
    let server = setup_mock_server().await;
    let original = fresh_token("user-1");
    let refreshed = token_expiring_in("user-1", 7200);

    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .and(header("authorization", format!("Bearer {original}").as_str()))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token revoked"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"accessToken": refreshed.clone()}))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .and(header("authorization", format!("Bearer {refreshed}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(email_user("user-1"))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    session.tokens().set_token(Some(original));

    let user = assert_ok!(session.client().get_profile().await);
    assert_eq!(user.email.as_deref(), Some("user-1@example.com"));
    assert_eq!(session.tokens().get_token(), Some(refreshed));
}

#[tokio::test]
async fn test_second_unauthorized_surfaces_without_another_retry() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token revoked"})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"accessToken": fresh_token("user-1")}))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    session.tokens().set_token(Some(fresh_token("user-1")));

    let err = session.client().get_profile().await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(err.is_auth_error());
}

#[tokio::test]
async fn test_unauthorized_login_is_not_retried() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": "INVALID_CREDENTIALS", "message": "Invalid email or password"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    session.tokens().set_token(Some(fresh_token("user-1")));

    let err = session.client().login("ada@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.code(), Some("INVALID_CREDENTIALS"));
}

#[tokio::test]
async fn test_rotated_token_header_is_adopted() {
    let server = setup_mock_server().await;
    let rotated = token_expiring_in("user-1", 5400);
    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-New-Access-Token", rotated.as_str())
                .set_body_json(envelope(email_user("user-1"))),
        )
        .mount(&server)
        .await;

    let storage = memory_storage();
    let session = session_for(&server, storage.clone());
    session.tokens().set_token(Some(fresh_token("user-1")));

    assert_ok!(session.client().get_profile().await);
    assert_eq!(session.tokens().get_token(), Some(rotated.clone()));
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), Some(rotated));
}

#[tokio::test]
async fn test_refresh_prefers_rotated_token_header() {
    let server = setup_mock_server().await;
    let rotated = token_expiring_in("user-1", 5400);
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-New-Access-Token", rotated.as_str())
                .set_body_json(envelope(json!({"accessToken": fresh_token("user-1")}))),
        )
        .expect(2)
        .mount(&server)
        .await;

    let storage = memory_storage();
    let session = session_for(&server, storage.clone());

    assert_eq!(session.tokens().refresh().await, Some(rotated.clone()));
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), Some(rotated.clone()));

    let response = assert_ok!(session.client().refresh().await);
    assert_eq!(response.access_token, rotated);
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/first-register"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "42")
                .set_body_json(json!({"code": "OTP_REQUEST_LIMIT_EXCEEDED", "message": "Too many requests"})),
        )
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let err = session.client().request_registration_otp("ada@example.com").await.unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(err.retry_delay(), Some(42));
}

#[tokio::test]
async fn test_server_error_is_not_an_auth_error() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/request-password-reset"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let err = session.client().request_password_reset("ada@example.com").await.unwrap_err();

    assert!(matches!(err, PassageError::Server { status: 503, .. }));
    assert!(err.is_retryable());
    assert!(!err.is_auth_error());
}

#[tokio::test]
async fn test_unsuccessful_envelope_is_a_validation_error() {
    let server = setup_mock_server().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/verify-otp"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": false, "code": "OTP_INVALID", "message": "Invalid code"})),
        )
        .mount(&server)
        .await;

    let session = session_for(&server, memory_storage());
    let err = session.client().verify_registration_otp("ada@example.com", "000000").await.unwrap_err();

    assert_eq!(err.code(), Some("OTP_INVALID"));
    assert_eq!(err.as_auth_error().map(|e| e.message.as_str()), Some("Invalid code"));
}
