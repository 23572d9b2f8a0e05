/*
[INPUT]:  Identity service schema definitions and serde requirements
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - authenticated user projection
[UPDATE]: When API schema changes or new types added
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AccountStatus, AuthType, Role};

/// Profile projection of the authenticated identity.
///
/// Never persisted client-side; always rehydrated from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "name")]
    pub full_name: Option<String>,
    #[serde(default = "default_status")]
    pub status: AccountStatus,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_auth_type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscription: Option<Subscription>,
}

impl SessionUser {
    /// Case-insensitive comparison against the linked wallet address.
    pub fn has_wallet(&self, address: &str) -> bool {
        self.wallet_address
            .as_deref()
            .is_some_and(|linked| same_address(linked, address))
    }

    pub fn is_wallet_session(&self) -> bool {
        self.auth_type == AuthType::Web3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Compare two wallet addresses ignoring case and surrounding whitespace.
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn default_status() -> AccountStatus {
    AccountStatus::Active
}

fn default_role() -> Role {
    Role::User
}

fn default_auth_type() -> AuthType {
    AuthType::Email
}
