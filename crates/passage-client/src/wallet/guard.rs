/*
[INPUT]:  Wallet connection events and the session
[OUTPUT]: Forced logout of wallet sessions on disconnect or account switch
[POS]:    Wallet layer - reactive session guard
[UPDATE]: When debounce timing or logout triggers change
*/

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::{LogoutReason, Session};

use super::provider::WalletConnection;

pub const DEFAULT_DISCONNECT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Ends wallet-established sessions when the wallet goes away or switches account.
///
/// Sessions with any other `authType` are never touched.
#[derive(Debug, Clone)]
pub struct WalletSessionGuard {
    session: Session,
    debounce: Duration,
}

impl WalletSessionGuard {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            debounce: DEFAULT_DISCONNECT_DEBOUNCE,
        }
    }

    /// Debounce applied to disconnects to ride out provider reconnect blips
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn spawn(self, connection: watch::Receiver<WalletConnection>) -> JoinHandle<()> {
        tokio::spawn(self.run(connection))
    }

    /// Process connection events one at a time until the provider goes away
    pub async fn run(self, mut connection: watch::Receiver<WalletConnection>) {
        while connection.changed().await.is_ok() {
            let current = connection.borrow_and_update().clone();
            self.evaluate(current, &mut connection).await;
        }
    }

    async fn evaluate(&self, current: WalletConnection, connection: &mut watch::Receiver<WalletConnection>) {
        if !self.guards_wallet_session() {
            return;
        }

        if !current.connected {
            debug!(debounce_ms = self.debounce.as_millis() as u64, "wallet disconnected; debouncing");
            tokio::time::sleep(self.debounce).await;
            // a reconnect, possibly to another account, is handled as its own event
            if connection.borrow().connected || !self.guards_wallet_session() {
                debug!("wallet reconnected within debounce window");
                return;
            }
            warn!("wallet disconnected; ending wallet session");
            self.session.force_logout(LogoutReason::WalletDisconnected).await;
            return;
        }

        let (Some(address), Some(user)) = (current.address.as_deref(), self.session.current_user()) else {
            return;
        };
        let Some(linked) = user.wallet_address.as_deref() else {
            return;
        };
        if !user.has_wallet(address) {
            warn!(linked, connected = address, "wallet account changed; ending wallet session");
            self.session.force_logout(LogoutReason::WalletAccountChanged).await;
        }
    }

    fn guards_wallet_session(&self) -> bool {
        self.session
            .current_user()
            .is_some_and(|user| user.is_wallet_session())
    }
}
