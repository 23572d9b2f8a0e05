/*
[INPUT]:  Email address, OTP code, final profile fields
[OUTPUT]: OTP dispatch/verification results and hand-off to Session::register
[POS]:    Session layer - OTP-gated registration, kept outside the session
[UPDATE]: When the registration steps or persisted fields change
*/

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auth::{KeyValueStorage, REGISTRATION_EMAIL_KEY};
use crate::http::{AuthError, AuthErrorKind, IdentityClient, PassageError, Result};
use crate::types::{OtpDispatch, OtpVerification, SessionUser};

use super::manager::Session;
use super::state::RegistrationProfile;

/// Ephemeral progress of one registration
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationFlowState {
    pub email: String,
    /// `None` when the flow was restored from storage after a restart
    pub otp_requested_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub verification_token: Option<String>,
}

impl RegistrationFlowState {
    fn requested(email: &str) -> Self {
        Self {
            email: email.to_string(),
            otp_requested_at: Some(Utc::now()),
            verified: false,
            verification_token: None,
        }
    }
}

/// Three-step registration: send OTP, verify OTP, complete profile.
///
/// Only the email survives a restart. Nothing here authenticates a session until
/// [`RegistrationFlow::complete`] hands off to [`Session::register`].
pub struct RegistrationFlow {
    client: IdentityClient,
    storage: Arc<dyn KeyValueStorage>,
    state: Mutex<Option<RegistrationFlowState>>,
}

impl RegistrationFlow {
    pub fn new(client: IdentityClient, storage: Arc<dyn KeyValueStorage>) -> Self {
        let restored = storage.get(REGISTRATION_EMAIL_KEY).map(|email| RegistrationFlowState {
            email,
            otp_requested_at: None,
            verified: false,
            verification_token: None,
        });
        if let Some(state) = restored.as_ref() {
            debug!(email = %state.email, "restored pending registration");
        }
        Self {
            client,
            storage,
            state: Mutex::new(restored),
        }
    }

    pub fn state(&self) -> Option<RegistrationFlowState> {
        self.lock().clone()
    }

    pub fn pending_email(&self) -> Option<String> {
        self.lock().as_ref().map(|state| state.email.clone())
    }

    /// Step 1: ask the server to email a code
    pub async fn send_otp(&self, email: &str) -> Result<OtpDispatch> {
        let email = email.trim();
        let dispatch = self.client.request_registration_otp(email).await?;

        *self.lock() = Some(RegistrationFlowState::requested(email));
        if let Err(err) = self.storage.set(REGISTRATION_EMAIL_KEY, email) {
            warn!(error = %err, "failed to persist registration email");
        }
        info!(email, expires_at = ?dispatch.expires_at, "registration otp sent");
        Ok(dispatch)
    }

    /// Step 2: verify the code. Does not authenticate anything.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<OtpVerification> {
        let email = email.trim();
        let verification = self.client.verify_registration_otp(email, code.trim()).await?;

        let mut state = self.lock();
        let flow = match state.take() {
            Some(existing) if existing.email.eq_ignore_ascii_case(email) => existing,
            _ => RegistrationFlowState {
                email: email.to_string(),
                otp_requested_at: None,
                verified: false,
                verification_token: None,
            },
        };
        *state = Some(RegistrationFlowState {
            verified: true,
            verification_token: verification.verification_token.clone(),
            ..flow
        });
        info!(email, "registration otp verified");
        Ok(verification)
    }

    /// Step 3: submit the profile through the session, then discard the flow
    pub async fn complete(&self, session: &Session, full_name: &str, password: &str) -> Result<SessionUser> {
        let flow = self
            .state()
            .filter(|flow| flow.verified)
            .ok_or_else(|| {
                PassageError::Auth(
                    AuthError::new(AuthErrorKind::Validation, "Verify your email before completing registration")
                        .with_code("REGISTRATION_NOT_VERIFIED"),
                )
            })?;

        let user = session
            .register(RegistrationProfile {
                email: flow.email,
                full_name: full_name.to_string(),
                password: password.to_string(),
                verification_token: flow.verification_token,
            })
            .await?;

        self.abandon();
        Ok(user)
    }

    /// Discard any progress, including the persisted email
    pub fn abandon(&self) {
        *self.lock() = None;
        if let Err(err) = self.storage.remove(REGISTRATION_EMAIL_KEY) {
            warn!(error = %err, "failed to clear registration email");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<RegistrationFlowState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
