/*
[INPUT]:  Session transitions from the orchestrator
[OUTPUT]: Session state, lifecycle events and logout notices
[POS]:    Session layer - observable state types
[UPDATE]: When adding session states, events or logout reasons
*/

use std::fmt;

use crate::types::{AuthType, LinkType, SessionUser};

/// Authentication state. The user exists exactly when the session is authenticated.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Initialization has not run yet
    #[default]
    Unknown,
    Unauthenticated,
    Authenticated(SessionUser),
}

impl SessionState {
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Unknown)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserInitiated,
    WalletDisconnected,
    WalletAccountChanged,
    SessionExpired,
}

impl LogoutReason {
    /// Explanation to surface to the user; `None` when the user asked for it
    pub fn notice(self) -> Option<&'static str> {
        match self {
            LogoutReason::UserInitiated => None,
            LogoutReason::WalletDisconnected => {
                Some("Your wallet was disconnected, so you have been signed out.")
            }
            LogoutReason::WalletAccountChanged => Some(
                "You switched to a different wallet account. Sign in again with the new account to continue.",
            ),
            LogoutReason::SessionExpired => Some("Your session has expired. Please sign in again."),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoggedIn { user_id: String, auth_type: AuthType },
    LoggedOut { reason: LogoutReason },
    UserUpdated { user_id: String },
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub user: SessionUser,
    /// Redirect target recorded before the attempt began, consumed by this login
    pub redirect_to: Option<String>,
}

/// Result of linking a wallet and an email identity
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutcome {
    pub link_type: LinkType,
    pub user: SessionUser,
}

/// Input for the final registration step
#[derive(Clone, PartialEq)]
pub struct RegistrationProfile {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub verification_token: Option<String>,
}

impl fmt::Debug for RegistrationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationProfile")
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("password", &"<redacted>")
            .field("has_verification_token", &self.verification_token.is_some())
            .finish()
    }
}
