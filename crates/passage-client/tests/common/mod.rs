/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for passage-client tests

#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use passage_client::{ClientConfig, KeyValueStorage, MemoryStorage, Session};
use serde_json::{Value, json};
use wiremock::MockServer;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Unsigned access token expiring `secs` from now (negative for already expired)
pub fn token_expiring_in(subject: &str, secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({"sub": subject, "iat": now, "exp": now + secs});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// Token valid for an hour
pub fn fresh_token(subject: &str) -> String {
    token_expiring_in(subject, 3600)
}

pub fn memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

/// Session pointed at the mock server's `/api/` base path
pub fn session_for(server: &MockServer, storage: Arc<dyn KeyValueStorage>) -> Session {
    let config = ClientConfig::with_base_url(format!("{}/api", server.uri()));
    Session::connect(config, storage).expect("session should build")
}

pub fn email_user(id: &str) -> Value {
    json!({
        "id": id,
        "email": format!("{id}@example.com"),
        "fullName": "Ada Lovelace",
        "status": "ACTIVE",
        "role": "USER",
        "authType": "EMAIL",
        "isEmailVerified": true,
    })
}

pub fn wallet_user(id: &str, wallet_address: Option<&str>) -> Value {
    let mut user = json!({
        "id": id,
        "status": "ACTIVE",
        "role": "USER",
        "authType": "WEB3",
        "isEmailVerified": false,
    });
    if let Some(address) = wallet_address {
        user["walletAddress"] = json!(address);
    }
    user
}

/// Wrap a payload in the service's `{success, data}` envelope
pub fn envelope(data: Value) -> Value {
    json!({"success": true, "data": data})
}

pub fn error_body(code: &str, message: &str) -> Value {
    json!({"success": false, "code": code, "message": message})
}
