/*
[INPUT]:  Wallet connection events and the session
[OUTPUT]: Challenge/signature exchange and wallet login outcomes
[POS]:    Wallet layer - reactive wallet login driver
[UPDATE]: When the challenge message format or firing rules change
*/

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::http::PassageError;
use crate::session::Session;
use crate::types::same_address;

use super::provider::{WalletConnection, WalletProvider};

const DEFAULT_APP_NAME: &str = "Passage";

/// How a wallet login attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletLoginOutcome {
    Authenticated {
        address: String,
    },
    /// The user declined to sign
    Cancelled {
        address: String,
    },
    Failed {
        address: String,
        code: Option<String>,
        message: String,
    },
}

/// Human-readable challenge embedding the address, a timestamp and a nonce.
///
/// The nonce and timestamp only make each request unique; replay protection is
/// the server's job.
pub fn challenge_message(app_name: &str, address: &str, issued_at: DateTime<Utc>, nonce: &str) -> String {
    format!(
        "{app_name} wants you to sign in with your wallet.\n\n\
         Wallet: {address}\n\
         Timestamp: {}\n\
         Nonce: {nonce}",
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Drives wallet login from provider connection events.
///
/// Fires at most once per connection event and never while an attempt for the
/// same address is still outstanding.
#[derive(Clone)]
pub struct WalletLoginCoordinator {
    session: Session,
    provider: Arc<dyn WalletProvider>,
    outstanding: Arc<Mutex<Option<String>>>,
    outcomes: broadcast::Sender<WalletLoginOutcome>,
    app_name: String,
}

impl WalletLoginCoordinator {
    pub fn new(session: Session, provider: Arc<dyn WalletProvider>) -> Self {
        let (outcomes, _) = broadcast::channel(16);
        Self {
            session,
            provider,
            outstanding: Arc::new(Mutex::new(None)),
            outcomes,
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn outcomes(&self) -> broadcast::Receiver<WalletLoginOutcome> {
        self.outcomes.subscribe()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// React to connection events until the provider goes away
    pub async fn run(self) {
        let mut connection = self.provider.connection();
        let initial = connection.borrow_and_update().clone();
        self.on_connection(initial);

        while connection.changed().await.is_ok() {
            let current = connection.borrow_and_update().clone();
            self.on_connection(current);
        }
        debug!("wallet provider closed; coordinator stopping");
    }

    fn on_connection(&self, connection: WalletConnection) {
        if !connection.connected {
            return;
        }
        let Some(address) = connection.address.filter(|address| !address.trim().is_empty()) else {
            return;
        };
        if self.session.is_authenticated() {
            return;
        }

        {
            let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
            if outstanding
                .as_deref()
                .is_some_and(|pending| same_address(pending, &address))
            {
                debug!(address = %address, "wallet login already outstanding");
                return;
            }
            *outstanding = Some(address.clone());
        }

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.attempt(&address).await;
            {
                let mut outstanding = this.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
                if outstanding
                    .as_deref()
                    .is_some_and(|pending| same_address(pending, &address))
                {
                    *outstanding = None;
                }
            }
            let _ = this.outcomes.send(outcome);
        });
    }

    async fn attempt(&self, address: &str) -> WalletLoginOutcome {
        let message = challenge_message(&self.app_name, address, Utc::now(), &new_nonce());
        debug!(address, "requesting wallet signature");

        let signature = match self.provider.sign_message(address, &message).await {
            Ok(signature) => signature,
            Err(PassageError::SignatureRejected) => {
                info!(address, "wallet signature request cancelled by user");
                return WalletLoginOutcome::Cancelled {
                    address: address.to_string(),
                };
            }
            Err(err) => return failed(address, &err),
        };

        match self.session.login_with_wallet(address, &signature, &message).await {
            Ok(_) => WalletLoginOutcome::Authenticated {
                address: address.to_string(),
            },
            Err(err) => failed(address, &err),
        }
    }
}

fn failed(address: &str, err: &PassageError) -> WalletLoginOutcome {
    warn!(address, error = %err, "wallet login failed");
    WalletLoginOutcome::Failed {
        address: address.to_string(),
        code: err.code().map(str::to_string),
        message: err.to_string(),
    }
}
