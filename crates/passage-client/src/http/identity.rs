/*
[INPUT]:  Credentials, OTP codes, wallet signatures and the token store
[OUTPUT]: Typed identity service results and classified errors
[POS]:    HTTP layer - identity endpoints with bearer attachment and 401 retry
[UPDATE]: When adding identity endpoints or changing retry behaviour
*/

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::TokenStore;
use crate::http::client::{Endpoint, HttpTransport, RawResponse, request_refresh};
use crate::http::{PassageError, Result};
use crate::types::{
    Acknowledgement, AuthSession, CompleteProfileRequest, EmailRequest, LinkWalletRequest,
    LinkWalletResponse, LoginRequest, OtpDispatch, OtpVerification, RefreshResponse,
    ResetPasswordRequest, SessionUser, VerifyOtpRequest, WalletLoginRequest,
};

/// Stateless façade over the identity service.
///
/// Reads the current token from the [`TokenStore`] and writes to it only when the
/// server pushes a replacement through the `X-New-Access-Token` header or a 401
/// forces a refresh.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    transport: HttpTransport,
    tokens: TokenStore,
}

impl IdentityClient {
    pub fn new(transport: HttpTransport, tokens: TokenStore) -> Self {
        Self { transport, tokens }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// POST /auth/first-register
    pub async fn request_registration_otp(&self, email: &str) -> Result<OtpDispatch> {
        info!(email, "requesting registration otp");
        let body = EmailRequest {
            email: email.to_string(),
        };
        self.call(Endpoint::FirstRegister, Some(&body)).await
    }

    /// POST /auth/verify-otp
    pub async fn verify_registration_otp(&self, email: &str, otp: &str) -> Result<OtpVerification> {
        let body = VerifyOtpRequest {
            email: email.to_string(),
            otp: otp.to_string(),
        };
        self.call(Endpoint::VerifyOtp, Some(&body)).await
    }

    /// POST /auth/complete-profile
    pub async fn complete_registration(&self, request: &CompleteProfileRequest) -> Result<AuthSession> {
        info!(email = %request.email, "completing registration");
        self.call(Endpoint::CompleteProfile, Some(request)).await
    }

    /// POST /auth/login
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.call(Endpoint::Login, Some(&body)).await
    }

    /// POST /auth/web3-login
    pub async fn wallet_login(&self, wallet_address: &str, signature: &str, message: &str) -> Result<AuthSession> {
        let body = WalletLoginRequest {
            wallet_address: wallet_address.to_string(),
            signature: signature.to_string(),
            message: message.to_string(),
        };
        self.call(Endpoint::Web3Login, Some(&body)).await
    }

    /// POST /auth/refresh-token
    ///
    /// Cookie only. Does not touch the token store; use [`TokenStore::refresh`] for that.
    pub async fn refresh(&self) -> Result<RefreshResponse> {
        request_refresh(&self.transport).await
    }

    /// POST /auth/logout
    pub async fn logout(&self) -> Result<()> {
        let _: Value = self.call(Endpoint::Logout, None::<&Value>).await?;
        Ok(())
    }

    /// GET /auth/profile
    ///
    /// Accepts the projection bare or wrapped in `user`.
    pub async fn get_profile(&self) -> Result<SessionUser> {
        let mut payload: Value = self.call(Endpoint::Profile, None::<&Value>).await?;
        if payload.get("user").is_some_and(Value::is_object) {
            payload = payload["user"].take();
        }
        if payload.is_null() {
            return Err(PassageError::InvalidResponse("profile response was empty".to_string()));
        }
        Ok(serde_json::from_value(payload)?)
    }

    /// POST /auth/link-email-to-web3
    pub async fn link_wallet_to_email(&self, email: &str, wallet_address: &str) -> Result<LinkWalletResponse> {
        info!(email, address = wallet_address, "linking wallet and email identities");
        let body = LinkWalletRequest {
            email: email.to_string(),
            wallet_address: wallet_address.to_string(),
        };
        self.call(Endpoint::LinkEmailToWeb3, Some(&body)).await
    }

    /// POST /auth/request-password-reset
    pub async fn request_password_reset(&self, email: &str) -> Result<Acknowledgement> {
        info!(email, "requesting password reset");
        let body = EmailRequest {
            email: email.to_string(),
        };
        self.call(Endpoint::RequestPasswordReset, Some(&body)).await
    }

    /// POST /auth/reset-password
    pub async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<Acknowledgement> {
        let body = ResetPasswordRequest {
            email: email.to_string(),
            otp: otp.to_string(),
            new_password: new_password.to_string(),
        };
        self.call(Endpoint::ResetPassword, Some(&body)).await
    }

    async fn call<B, T>(&self, endpoint: Endpoint, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        self.execute(endpoint, body.as_ref()).await
    }

    /// Shared request path: bearer attachment, header-driven token rotation and
    /// at most one retry after a 401.
    async fn execute<T: DeserializeOwned>(&self, endpoint: Endpoint, body: Option<&Value>) -> Result<T> {
        let mut retried = false;
        loop {
            let bearer = self.bearer_for(endpoint).await;
            let attached = bearer.is_some();

            let response = self.transport.send(endpoint, body, bearer.as_deref()).await?;
            self.adopt_rotated_token(&response);

            match response.into_result::<T>() {
                Err(err)
                    if err.is_unauthorized()
                        && attached
                        && !retried
                        && endpoint.retries_on_unauthorized() =>
                {
                    retried = true;
                    debug!(endpoint = endpoint.path(), "unauthorized; refreshing token and retrying once");
                    if self.tokens.refresh().await.is_none() {
                        warn!(endpoint = endpoint.path(), "refresh after 401 failed");
                        return Err(err);
                    }
                }
                other => return other,
            }
        }
    }

    async fn bearer_for(&self, endpoint: Endpoint) -> Option<String> {
        if !endpoint.sends_bearer() {
            return None;
        }
        if endpoint.retries_on_unauthorized() {
            self.tokens.get_valid_token().await
        } else {
            self.tokens.get_token()
        }
    }

    fn adopt_rotated_token(&self, response: &RawResponse) {
        if let Some(token) = response.new_access_token.as_ref() {
            if self.tokens.get_token().as_ref() != Some(token) {
                debug!("adopting access token pushed by server");
                self.tokens.set_token(Some(token.clone()));
            }
        }
    }
}
