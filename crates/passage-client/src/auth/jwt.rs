/*
[INPUT]:  Opaque bearer tokens (JWT compact serialization)
[OUTPUT]: Decoded subject/issued-at/expiry claims and local freshness checks
[POS]:    Auth layer - credential codec, local use only
[UPDATE]: When the token claim layout or freshness rules change
*/

use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Buffer used for proactive refresh and `get_valid_token`
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 5 * 60;

pub fn default_expiry_buffer() -> Duration {
    Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS)
}

/// Claims read from an access token.
///
/// The signature is never checked here. These values only decide local freshness
/// and must not be treated as proof of identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Decode the payload segment of a JWT.
///
/// Returns `None` when the token does not have three segments or the payload is
/// not base64url-encoded JSON.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let payload_b64 = segments[1];
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| URL_SAFE.decode(payload_b64))
        .ok()?;

    let payload: Value = serde_json::from_slice(&payload_bytes).ok()?;
    if !payload.is_object() {
        return None;
    }

    let subject_id = ["sub", "userId", "id"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(claim_as_string));

    Some(TokenClaims {
        subject_id,
        issued_at: payload.get("iat").and_then(claim_as_timestamp),
        expires_at: payload.get("exp").and_then(claim_as_timestamp),
    })
}

/// `expiresAt <= now + buffer`; tokens without a readable expiry count as expired.
pub fn is_expired(token: &str, buffer: Duration) -> bool {
    is_expired_at(token, buffer, Utc::now())
}

pub fn is_expired_at(token: &str, buffer: Duration, now: DateTime<Utc>) -> bool {
    match decode_claims(token).and_then(|claims| claims.expires_at) {
        Some(expires_at) => expires_at <= now + buffer,
        None => true,
    }
}

/// Delay until the token enters its refresh window, clamped at zero.
///
/// `None` when the token carries no readable expiry.
pub fn refresh_delay(token: &str, buffer: Duration, now: DateTime<Utc>) -> Option<std::time::Duration> {
    let expires_at = decode_claims(token)?.expires_at?;
    let remaining = expires_at - now - buffer;
    Some(remaining.to_std().unwrap_or(std::time::Duration::ZERO))
}

fn claim_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn claim_as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(secs, 0)
}

/// Build an unsigned token for tests. Header and signature are placeholders.
#[cfg(test)]
pub(crate) fn make_test_token(claims: serde_json::Value) -> String {
    let header = serde_json::json!({"alg": "none", "typ": "JWT"});
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("{header_b64}.{payload_b64}.signature")
}
