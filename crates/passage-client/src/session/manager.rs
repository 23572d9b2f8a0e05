/*
[INPUT]:  Identity client, token store, credentials and wallet signatures
[OUTPUT]: Authenticated session state, busy flag and lifecycle events
[POS]:    Session layer - orchestrates every login mode into one state machine
[UPDATE]: When session transitions or login modes change
*/

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::jwt::default_expiry_buffer;
use crate::auth::{KeyValueStorage, TokenEvent, TokenStore};
use crate::http::{ClientConfig, HttpTransport, IdentityClient, PassageError, RefreshEndpoint, Result};
use crate::types::{AuthSession, AuthType, CompleteProfileRequest, SessionUser};

use super::state::{
    LinkOutcome, LoginOutcome, LogoutReason, RegistrationProfile, SessionEvent, SessionState,
};

/// Sole writer of the authenticated-user state.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client: IdentityClient,
    state: watch::Sender<SessionState>,
    // operations in flight; zero means idle
    busy: watch::Sender<usize>,
    redirect: Mutex<Option<String>>,
    // bumped whenever the session is ended; profile commits from older epochs are dropped
    epoch: AtomicU64,
    token_watcher: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

struct BusyGuard<'a> {
    busy: &'a watch::Sender<usize>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl Session {
    pub fn new(client: IdentityClient) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        let (busy, _) = watch::channel(0);
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(SessionInner {
                client,
                state,
                busy,
                redirect: Mutex::new(None),
                epoch: AtomicU64::new(0),
                token_watcher: Mutex::new(None),
                events,
            }),
        }
    }

    /// Wire transport, token store and identity client for one process
    pub fn connect(config: ClientConfig, storage: Arc<dyn KeyValueStorage>) -> Result<Self> {
        let buffer = chrono::Duration::from_std(config.refresh_buffer).unwrap_or_else(|_| default_expiry_buffer());
        let transport = HttpTransport::with_config(config)?;
        let refresher = Arc::new(RefreshEndpoint::new(transport.clone()));
        let tokens = TokenStore::with_buffer(storage, refresher, buffer);
        Ok(Self::new(IdentityClient::new(transport, tokens)))
    }

    pub fn client(&self) -> &IdentityClient {
        &self.inner.client
    }

    pub fn tokens(&self) -> &TokenStore {
        self.inner.client.tokens()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow() > 0
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Observe the number of operations in flight
    pub fn subscribe_busy(&self) -> watch::Receiver<usize> {
        self.inner.busy.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Record where to send the user after the next successful login
    pub fn set_redirect_target(&self, target: impl Into<String>) {
        *self.lock_redirect() = Some(target.into());
    }

    pub fn pending_redirect(&self) -> Option<String> {
        self.lock_redirect().clone()
    }

    /// Resolve the initial state from a persisted token.
    ///
    /// Without any stored token (including storage-less contexts) this lands on
    /// `Unauthenticated` without touching the network.
    pub async fn initialize(&self) -> SessionState {
        let _busy = self.begin();
        self.ensure_token_watcher();
        let epoch = self.epoch();
        let tokens = self.tokens();

        if tokens.get_token().or_else(|| tokens.restore()).is_none() {
            debug!("no stored access token");
            self.set_state(SessionState::Unauthenticated);
            return self.state();
        }

        if !tokens.is_authenticated() {
            debug!("stored access token expired; attempting refresh");
            if tokens.refresh().await.is_none() {
                tokens.clear();
                self.set_state(SessionState::Unauthenticated);
                return self.state();
            }
        }

        match self.inner.client.get_profile().await {
            Ok(user) => {
                let user_id = user.id.clone();
                if self.commit_profile(epoch, user) {
                    info!(user_id = %user_id, "session restored");
                }
            }
            Err(err) => {
                warn!(error = %err, "profile fetch failed during initialization; clearing tokens");
                tokens.clear();
                self.set_state(SessionState::Unauthenticated);
            }
        }
        self.state()
    }

    /// Email/password login. Errors are returned unchanged.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let redirect = self.pending_redirect();
        let _busy = self.begin();

        let response = self.inner.client.login(email, password).await?;
        let user = self.establish(response.access_token, response.user);
        info!(user_id = %user.id, "signed in with email");

        Ok(LoginOutcome {
            user,
            redirect_to: self.consume_redirect(redirect),
        })
    }

    /// Wallet-signature login. Forces `authType = WEB3` and reconciles the wallet
    /// address from the response, falling back to `address`.
    pub async fn login_with_wallet(&self, address: &str, signature: &str, message: &str) -> Result<LoginOutcome> {
        let redirect = self.pending_redirect();
        let _busy = self.begin();

        let response = self.inner.client.wallet_login(address, signature, message).await?;
        let wallet_address = resolve_wallet_address(&response, address);
        let mut user = response.user;
        user.auth_type = AuthType::Web3;
        user.wallet_address = Some(wallet_address);

        let user = self.establish(response.access_token, user);
        info!(user_id = %user.id, address, "signed in with wallet");

        Ok(LoginOutcome {
            user,
            redirect_to: self.consume_redirect(redirect),
        })
    }

    /// Complete an OTP-verified registration and sign in
    pub async fn register(&self, profile: RegistrationProfile) -> Result<SessionUser> {
        let _busy = self.begin();

        let request = CompleteProfileRequest {
            email: profile.email,
            full_name: profile.full_name,
            password: profile.password,
            verification_token: profile.verification_token,
        };
        let response = self.inner.client.complete_registration(&request).await?;
        let user = self.establish(response.access_token, response.user);
        info!(user_id = %user.id, "registration completed");
        Ok(user)
    }

    /// Best-effort remote logout, then unconditional local cleanup
    pub async fn logout(&self) {
        self.end_session(LogoutReason::UserInitiated).await;
    }

    /// Logout initiated by the system rather than the user
    pub async fn force_logout(&self, reason: LogoutReason) {
        self.end_session(reason).await;
    }

    /// Refresh the access token and re-fetch the profile for the new token's subject
    pub async fn refresh_auth(&self) -> Result<SessionUser> {
        let _busy = self.begin();
        let epoch = self.epoch();

        if self.tokens().refresh().await.is_none() {
            self.expire();
            return Err(PassageError::SessionExpired);
        }

        match self.inner.client.get_profile().await {
            Ok(profile) => {
                let user = carry_wallet_identity(self.current_user().as_ref(), profile);
                if !self.commit_profile(epoch, user.clone()) {
                    return Err(PassageError::SessionExpired);
                }
                Ok(user)
            }
            Err(err) => {
                if err.is_auth_error() {
                    self.expire();
                }
                Err(err)
            }
        }
    }

    /// Link a wallet to an email identity. State is untouched on failure.
    pub async fn link_email_to_web3(&self, email: &str, address: &str) -> Result<LinkOutcome> {
        let _busy = self.begin();

        let response = self.inner.client.link_wallet_to_email(email, address).await?;
        let mut user = response.user;
        if user.wallet_address.as_deref().is_none_or(str::is_empty) {
            user.wallet_address = Some(address.to_string());
        }

        self.tokens().set_token(Some(response.access_token));
        self.set_state(SessionState::Authenticated(user.clone()));
        let _ = self.inner.events.send(SessionEvent::UserUpdated {
            user_id: user.id.clone(),
        });
        info!(link_type = ?response.link_type, user_id = %user.id, "identities linked");

        Ok(LinkOutcome {
            link_type: response.link_type,
            user,
        })
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let _busy = self.begin();
        self.inner.client.request_password_reset(email).await?;
        Ok(())
    }

    pub async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<()> {
        let _busy = self.begin();
        self.inner.client.reset_password(email, otp, new_password).await?;
        Ok(())
    }

    /// End the session when a background token refresh fails. Started at most once.
    fn ensure_token_watcher(&self) {
        let mut watcher = self
            .inner
            .token_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *watcher = Some(self.spawn_token_watcher());
    }

    fn spawn_token_watcher(&self) -> JoinHandle<()> {
        let mut events = self.tokens().subscribe();
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TokenEvent::RefreshFailed) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        Session { inner }.expire();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "token event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn end_session(&self, reason: LogoutReason) {
        let _busy = self.begin();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.inner.client.logout().await {
            warn!(error = %err, "remote logout failed; clearing local session anyway");
        }
        self.tokens().clear();
        self.set_state(SessionState::Unauthenticated);
        info!(?reason, "signed out");
        let _ = self.inner.events.send(SessionEvent::LoggedOut { reason });
    }

    /// Drop local state after an unrecoverable refresh failure
    fn expire(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.tokens().clear();
        let previous = self.inner.state.send_replace(SessionState::Unauthenticated);
        if previous.is_authenticated() {
            warn!("session expired");
            let _ = self.inner.events.send(SessionEvent::LoggedOut {
                reason: LogoutReason::SessionExpired,
            });
        }
    }

    fn establish(&self, access_token: String, user: SessionUser) -> SessionUser {
        self.ensure_token_watcher();
        self.tokens().set_token(Some(access_token));
        self.set_state(SessionState::Authenticated(user.clone()));
        let _ = self.inner.events.send(SessionEvent::LoggedIn {
            user_id: user.id.clone(),
            auth_type: user.auth_type,
        });
        user
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Authenticate with a fetched profile unless the session ended since `epoch`
    /// or no token is held. Returns whether the profile was committed.
    fn commit_profile(&self, epoch: u64, user: SessionUser) -> bool {
        let tokens = self.tokens();
        let committed = self.inner.state.send_if_modified(|state| {
            if self.inner.epoch.load(Ordering::SeqCst) != epoch || tokens.get_token().is_none() {
                return false;
            }
            *state = SessionState::Authenticated(user);
            true
        });
        if !committed {
            debug!("session ended while the profile was in flight; discarding it");
        }
        committed
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state.send_replace(state);
    }

    fn begin(&self) -> BusyGuard<'_> {
        self.inner.busy.send_modify(|count| *count += 1);
        BusyGuard {
            busy: &self.inner.busy,
        }
    }

    fn lock_redirect(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.inner.redirect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the redirect only if it is still the one seen when the attempt began
    fn consume_redirect(&self, seen: Option<String>) -> Option<String> {
        let mut slot = self.lock_redirect();
        if seen.is_some() && *slot == seen {
            slot.take()
        } else {
            None
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let watcher = self.token_watcher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = watcher.take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.inner.state.borrow())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Top-level field, then the nested user field, then the connecting address.
///
/// The server has been seen to put the address in either place or omit it.
fn resolve_wallet_address(response: &AuthSession, fallback: &str) -> String {
    [
        response.wallet_address.as_deref(),
        response.user.wallet_address.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|address| !address.is_empty())
    .unwrap_or(fallback)
    .to_string()
}

/// Keep the wallet login mode across a profile refresh of the same user
fn carry_wallet_identity(previous: Option<&SessionUser>, mut profile: SessionUser) -> SessionUser {
    let Some(previous) = previous.filter(|prev| prev.id == profile.id) else {
        return profile;
    };
    if previous.is_wallet_session() && profile.auth_type == AuthType::Email {
        profile.auth_type = AuthType::Web3;
    }
    if profile.wallet_address.is_none() {
        profile.wallet_address = previous.wallet_address.clone();
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(wallet: Option<&str>) -> SessionUser {
        serde_json::from_value(serde_json::json!({
            "id": "u-1",
            "authType": "WEB3",
            "walletAddress": wallet,
        }))
        .unwrap()
    }

    fn session_response(top: Option<&str>, nested: Option<&str>) -> AuthSession {
        AuthSession {
            user: user(nested),
            access_token: "t".to_string(),
            wallet_address: top.map(str::to_string),
        }
    }

    #[test]
    fn test_wallet_address_priority() {
        assert_eq!(resolve_wallet_address(&session_response(Some("0xTop"), Some("0xNested")), "0xArg"), "0xTop");
        assert_eq!(resolve_wallet_address(&session_response(None, Some("0xNested")), "0xArg"), "0xNested");
        assert_eq!(resolve_wallet_address(&session_response(Some(" "), None), "0xArg"), "0xArg");
        assert_eq!(resolve_wallet_address(&session_response(None, None), "0xArg"), "0xArg");
    }

    #[test]
    fn test_carry_wallet_identity_same_user() {
        let previous = user(Some("0xAAA"));
        let mut profile = user(None);
        profile.auth_type = AuthType::Email;

        let merged = carry_wallet_identity(Some(&previous), profile);
        assert_eq!(merged.auth_type, AuthType::Web3);
        assert_eq!(merged.wallet_address.as_deref(), Some("0xAAA"));
    }

    #[test]
    fn test_carry_wallet_identity_other_user_untouched() {
        let previous = user(Some("0xAAA"));
        let mut profile = user(None);
        profile.id = "u-2".to_string();
        profile.auth_type = AuthType::Email;

        let merged = carry_wallet_identity(Some(&previous), profile);
        assert_eq!(merged.auth_type, AuthType::Email);
        assert!(merged.wallet_address.is_none());
    }
}
