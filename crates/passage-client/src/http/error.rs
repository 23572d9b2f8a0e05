/*
[INPUT]:  Error sources (HTTP, identity API, serialization, storage, wallet)
[OUTPUT]: Structured error types with machine codes, classification and UI remedies
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or new server machine codes
*/

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Classification of errors returned by the identity service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Bad credentials, expired or invalid token, bad signature
    Authentication,
    /// Unverified, suspended or inactive account, insufficient role
    Authorization,
    /// Malformed input, bad or expired OTP, account in the wrong state
    Validation,
    /// Too many requests or quota exceeded
    RateLimit,
}

/// What the UI should offer the user after an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    ReenterCredentials,
    ResendOtp,
    LoginInstead,
    VerifyEmail,
    Wait,
    FixInput,
    ContactSupport,
}

/// Classified identity service error. The machine code is never dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub retry_after: Option<u64>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Classify a failed response. Returns `None` for 5xx and other non-client errors.
    ///
    /// The machine code wins over the HTTP status when it is recognised.
    pub fn classify(status: StatusCode, code: Option<&str>, message: impl Into<String>) -> Option<Self> {
        let kind = code
            .and_then(kind_from_code)
            .or_else(|| kind_from_status(status))?;

        let mut err = AuthError::new(kind, message).with_status(status.as_u16());
        err.code = code.map(str::to_string);
        Some(err)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == AuthErrorKind::RateLimit
    }

    pub fn remedy(&self) -> Remedy {
        if self.is_rate_limited() {
            return Remedy::Wait;
        }
        let code = self.code.as_deref().unwrap_or_default();
        if code.contains("OTP") {
            return Remedy::ResendOtp;
        }
        if code.contains("ALREADY_EXISTS") || code.contains("ALREADY_REGISTERED") {
            return Remedy::LoginInstead;
        }
        if code.contains("NOT_VERIFIED") {
            return Remedy::VerifyEmail;
        }
        match self.kind {
            AuthErrorKind::Authentication => Remedy::ReenterCredentials,
            AuthErrorKind::Authorization => Remedy::ContactSupport,
            AuthErrorKind::Validation => Remedy::FixInput,
            AuthErrorKind::RateLimit => Remedy::Wait,
        }
    }

    /// User-facing text; falls back to the server message for unmapped codes.
    pub fn user_message(&self) -> String {
        let mapped = match self.code.as_deref() {
            Some("INVALID_CREDENTIALS") => "Incorrect email or password.",
            Some("EMAIL_NOT_VERIFIED") => "Please verify your email address before signing in.",
            Some("ACCOUNT_SUSPENDED") => "This account has been suspended.",
            Some("ACCOUNT_INACTIVE") => "This account is not active.",
            Some("INVALID_OTP") => "The verification code is incorrect.",
            Some("OTP_EXPIRED") => "The verification code has expired. Request a new one.",
            Some("EMAIL_ALREADY_EXISTS") => "An account with this email already exists. Try signing in.",
            Some("INVALID_SIGNATURE") => "The wallet signature could not be verified.",
            Some("WALLET_ALREADY_LINKED") => "This wallet is already linked to another account.",
            _ if self.is_rate_limited() => match self.retry_after {
                Some(secs) => return format!("Too many attempts. Please wait {secs}s and try again."),
                None => "Too many attempts. Please wait and try again.",
            },
            _ => return self.message.clone(),
        };
        mapped.to_string()
    }
}

fn kind_from_code(code: &str) -> Option<AuthErrorKind> {
    let code = code.to_ascii_uppercase();
    let has = |needle: &str| code.contains(needle);

    if has("RATE_LIMIT") || has("TOO_MANY") || has("LIMIT_EXCEEDED") || has("QUOTA") {
        Some(AuthErrorKind::RateLimit)
    } else if has("NOT_VERIFIED")
        || has("SUSPENDED")
        || has("INACTIVE")
        || has("FORBIDDEN")
        || has("INSUFFICIENT")
    {
        Some(AuthErrorKind::Authorization)
    } else if has("OTP") {
        Some(AuthErrorKind::Validation)
    } else if has("CREDENTIALS") || has("TOKEN") || has("SIGNATURE") || has("UNAUTHORIZED") {
        Some(AuthErrorKind::Authentication)
    } else if has("VALIDATION")
        || has("INVALID")
        || has("EXISTS")
        || has("NOT_FOUND")
        || has("ALREADY")
        || has("REQUIRED")
    {
        Some(AuthErrorKind::Validation)
    } else {
        None
    }
}

fn kind_from_status(status: StatusCode) -> Option<AuthErrorKind> {
    match status {
        StatusCode::UNAUTHORIZED => Some(AuthErrorKind::Authentication),
        StatusCode::FORBIDDEN => Some(AuthErrorKind::Authorization),
        StatusCode::TOO_MANY_REQUESTS => Some(AuthErrorKind::RateLimit),
        s if s.is_client_error() => Some(AuthErrorKind::Validation),
        _ => None,
    }
}

/// Main error type for the passage client
#[derive(Error, Debug)]
pub enum PassageError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Identity service rejected the request
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Identity service failed on its side (5xx)
    #[error("Server error (status {status}): {message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Refresh failed and the session was ended
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// The user declined the wallet signature request
    #[error("Signature request rejected by the user")]
    SignatureRejected,

    /// Wallet provider unavailable or signing failed
    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl PassageError {
    /// Build an error from a non-2xx response body.
    ///
    /// Understands `{error: {message, code}}`, `{message, code}` and `{error: "..."}`.
    pub(crate) fn from_response(status: StatusCode, retry_after: Option<u64>, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let (message, code) = parsed
            .as_ref()
            .map(extract_message_and_code)
            .unwrap_or((None, None));

        let message = message.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });

        match AuthError::classify(status, code.as_deref(), message.clone()) {
            Some(mut err) => {
                err.retry_after = retry_after;
                PassageError::Auth(err)
            }
            None => PassageError::Server {
                status: status.as_u16(),
                code,
                message,
            },
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            PassageError::Auth(err) => err.status,
            PassageError::Server { status, .. } => Some(*status),
            PassageError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server machine code, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            PassageError::Auth(err) => err.code.as_deref(),
            PassageError::Server { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn as_auth_error(&self) -> Option<&AuthError> {
        match self {
            PassageError::Auth(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            PassageError::Auth(AuthError {
                kind: AuthErrorKind::Authentication,
                ..
            }) | PassageError::SessionExpired
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        self.as_auth_error().is_some_and(AuthError::is_rate_limited)
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PassageError::Http(_) | PassageError::Server { .. }) || self.is_rate_limited()
    }

    /// Get retry delay in seconds (if retryable)
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            PassageError::Auth(err) if err.is_rate_limited() => Some(err.retry_after.unwrap_or(1)),
            PassageError::Server { .. } => Some(1),
            _ => None,
        }
    }
}

pub(crate) fn extract_message_and_code(body: &Value) -> (Option<String>, Option<String>) {
    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

    if let Some(nested) = body.get("error").filter(|value| value.is_object()) {
        let message = text(nested.get("message")).or_else(|| text(body.get("message")));
        let code = text(nested.get("code")).or_else(|| text(body.get("code")));
        return (message, code);
    }

    let message = text(body.get("message")).or_else(|| text(body.get("error")));
    let code = text(body.get("code")).or_else(|| text(body.get("errorCode")));
    (message, code)
}

/// Result type alias for passage operations
pub type Result<T> = std::result::Result<T, PassageError>;
