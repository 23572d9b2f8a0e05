/*
[INPUT]:  HTTP configuration (base URL, timeouts), endpoints, bearer tokens
[OUTPUT]: Raw identity service responses and decoded payloads
[POS]:    HTTP layer - core transport shared by the identity client and token refresh
[UPDATE]: When adding connection options, endpoints or envelope rules
*/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::{TokenRefresher, jwt};
use crate::http::error::extract_message_and_code;
use crate::http::{AuthError, AuthErrorKind, PassageError, Result};
use crate::types::RefreshResponse;

/// Default identity service location
const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/";

/// Server-driven silent refresh header, honoured on any response
pub const NEW_ACCESS_TOKEN_HEADER: &str = "x-new-access-token";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// How long before expiry the access token is refreshed proactively
    pub refresh_buffer: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            refresh_buffer: Duration::from_secs(jwt::DEFAULT_EXPIRY_BUFFER_SECS as u64),
            user_agent: concat!("passage-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Identity service endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    FirstRegister,
    VerifyOtp,
    CompleteProfile,
    Login,
    Web3Login,
    RefreshToken,
    Logout,
    Profile,
    LinkEmailToWeb3,
    RequestPasswordReset,
    ResetPassword,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::FirstRegister => "auth/first-register",
            Endpoint::VerifyOtp => "auth/verify-otp",
            Endpoint::CompleteProfile => "auth/complete-profile",
            Endpoint::Login => "auth/login",
            Endpoint::Web3Login => "auth/web3-login",
            Endpoint::RefreshToken => "auth/refresh-token",
            Endpoint::Logout => "auth/logout",
            Endpoint::Profile => "auth/profile",
            Endpoint::LinkEmailToWeb3 => "auth/link-email-to-web3",
            Endpoint::RequestPasswordReset => "auth/request-password-reset",
            Endpoint::ResetPassword => "auth/reset-password",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Endpoint::Profile => Method::GET,
            _ => Method::POST,
        }
    }

    /// The refresh endpoint never receives the (possibly expired) bearer token
    pub fn sends_bearer(self) -> bool {
        self != Endpoint::RefreshToken
    }

    /// Calls that act on behalf of a signed-in user and may be retried after a refresh
    pub fn retries_on_unauthorized(self) -> bool {
        matches!(self, Endpoint::Profile | Endpoint::LinkEmailToWeb3)
    }
}

/// A response that reached us, successful or not
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub new_access_token: Option<String>,
    pub retry_after: Option<u64>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Decode the body, unwrapping the `{success, data, message}` envelope.
    ///
    /// 204 and empty bodies decode as an empty value without touching the JSON parser.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if !self.status.is_success() {
            return Err(PassageError::from_response(self.status, self.retry_after, &self.body));
        }
        if self.status == StatusCode::NO_CONTENT || self.body.iter().all(u8::is_ascii_whitespace) {
            return empty_value();
        }

        let value: Value = serde_json::from_slice(&self.body)?;
        let payload = unwrap_envelope(self.status, value)?;
        if payload.is_null() {
            return empty_value();
        }
        Ok(serde_json::from_value(payload)?)
    }
}

fn unwrap_envelope(status: StatusCode, value: Value) -> Result<Value> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };

    match map.get("success").and_then(Value::as_bool) {
        Some(false) => {
            let body = Value::Object(map);
            let (message, code) = extract_message_and_code(&body);
            let message = message.unwrap_or_else(|| "Request was not successful".to_string());
            let mut err = AuthError::classify(StatusCode::BAD_REQUEST, code.as_deref(), message.clone())
                .unwrap_or_else(|| AuthError::new(AuthErrorKind::Validation, message));
            err.status = Some(status.as_u16());
            Err(PassageError::Auth(err))
        }
        Some(true) if map.contains_key("data") => Ok(map.remove("data").unwrap_or(Value::Null)),
        _ => Ok(Value::Object(map)),
    }
}

fn empty_value<T: DeserializeOwned>() -> Result<T> {
    serde_json::from_value(Value::Null)
        .or_else(|_| serde_json::from_value(Value::Object(Map::new())))
        .map_err(PassageError::from)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Transport for the identity service.
///
/// Clones share one connection pool and one cookie jar, which is where the
/// long-lived refresh credential lives.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a transport with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .cookie_store(true)
            .build()?;

        // a trailing slash keeps any base path when joining relative endpoints
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            http_client,
            base_url: Url::parse(&base)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build full URL for an endpoint
    fn url(&self, endpoint: Endpoint) -> Result<Url> {
        Ok(self.base_url.join(endpoint.path())?)
    }

    pub(crate) async fn send(
        &self,
        endpoint: Endpoint,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<RawResponse> {
        let mut builder = self.http_client.request(endpoint.method(), self.url(endpoint)?);
        if let Some(token) = bearer.filter(|_| endpoint.sends_bearer()) {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers();
        let new_access_token = header_str(headers, NEW_ACCESS_TOKEN_HEADER);
        let retry_after = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.parse().ok());
        let body = response.bytes().await?.to_vec();

        debug!(endpoint = endpoint.path(), status = status.as_u16(), "identity response");

        Ok(RawResponse {
            status,
            new_access_token,
            retry_after,
            body,
        })
    }
}

/// POST the refresh endpoint, relying on the cookie jar only.
///
/// A token pushed in `X-New-Access-Token` wins over the one in the body.
pub(crate) async fn request_refresh(transport: &HttpTransport) -> Result<RefreshResponse> {
    let response = transport.send(Endpoint::RefreshToken, None, None).await?;
    let rotated = response.new_access_token.clone();
    let mut refreshed: RefreshResponse = response.into_result()?;
    if let Some(token) = rotated {
        debug!("refresh response carried a rotated token header");
        refreshed.access_token = token;
    }
    Ok(refreshed)
}

/// Token refresher backed by the identity service refresh endpoint
#[derive(Debug, Clone)]
pub struct RefreshEndpoint {
    transport: HttpTransport,
}

impl RefreshEndpoint {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TokenRefresher for RefreshEndpoint {
    async fn refresh_access_token(&self) -> Result<String> {
        let refreshed = request_refresh(&self.transport).await?;
        if refreshed.access_token.trim().is_empty() {
            return Err(PassageError::InvalidResponse(
                "refresh response carried an empty access token".to_string(),
            ));
        }
        Ok(refreshed.access_token)
    }
}
