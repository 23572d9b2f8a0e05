/*
[INPUT]:  Wallet signers and connect/disconnect/switch actions
[OUTPUT]: Connection state stream and signature requests
[POS]:    Wallet layer - wallet provider capability selected at composition time
[UPDATE]: When adding provider backends or connection fields
*/

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::http::{PassageError, Result};
use crate::types::same_address;

use super::WalletSigner;

/// What the wallet provider currently reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletConnection {
    pub connected: bool,
    pub address: Option<String>,
}

impl WalletConnection {
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            connected: true,
            address: Some(address.into()),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Capability exposed by a wallet integration
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Connection changes; every change is one connection event
    fn connection(&self) -> watch::Receiver<WalletConnection>;

    /// Ask the wallet holding `address` to sign `message`. May wait on the user indefinitely.
    async fn sign_message(&self, address: &str, message: &str) -> Result<String>;
}

/// Provider used when no wallet integration is available. Never connects.
#[derive(Debug)]
pub struct NoWalletProvider {
    connection: watch::Sender<WalletConnection>,
}

impl NoWalletProvider {
    pub fn new() -> Self {
        let (connection, _) = watch::channel(WalletConnection::disconnected());
        Self { connection }
    }
}

impl Default for NoWalletProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletProvider for NoWalletProvider {
    fn connection(&self) -> watch::Receiver<WalletConnection> {
        self.connection.subscribe()
    }

    async fn sign_message(&self, _address: &str, _message: &str) -> Result<String> {
        Err(PassageError::Wallet("no wallet provider available".to_string()))
    }
}

/// Provider backed by in-process signers; connect, switch and disconnect are explicit
pub struct LocalWalletProvider {
    connection: watch::Sender<WalletConnection>,
    active: Mutex<Option<Arc<dyn WalletSigner>>>,
}

impl LocalWalletProvider {
    pub fn new() -> Self {
        let (connection, _) = watch::channel(WalletConnection::disconnected());
        Self {
            connection,
            active: Mutex::new(None),
        }
    }

    /// Connect a signer, replacing (switching from) any active one
    pub fn connect(&self, signer: Arc<dyn WalletSigner>) {
        let address = signer.address().to_string();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(signer);
        info!(address = %address, "wallet connected");
        self.connection.send_replace(WalletConnection::connected(address));
    }

    pub fn disconnect(&self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("wallet disconnected");
        self.connection.send_replace(WalletConnection::disconnected());
    }

    /// Re-announce the current connection without changing it
    pub fn reannounce(&self) {
        self.connection.send_modify(|_| {});
    }

    pub fn current(&self) -> WalletConnection {
        self.connection.borrow().clone()
    }

    fn signer_for(&self, address: &str) -> Option<Arc<dyn WalletSigner>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|signer| same_address(signer.address(), address))
            .cloned()
    }
}

impl Default for LocalWalletProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletProvider for LocalWalletProvider {
    fn connection(&self) -> watch::Receiver<WalletConnection> {
        self.connection.subscribe()
    }

    async fn sign_message(&self, address: &str, message: &str) -> Result<String> {
        let signer = self
            .signer_for(address)
            .ok_or_else(|| PassageError::Wallet(format!("wallet {address} is not connected")))?;
        signer.sign_message(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::MockWalletSigner;

    #[tokio::test]
    async fn test_local_provider_connection_events() {
        let provider = LocalWalletProvider::new();
        let mut rx = provider.connection();
        assert!(!rx.borrow().connected);

        provider.connect(Arc::new(MockWalletSigner::new("0xAAA", "0xsig")));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), WalletConnection::connected("0xAAA"));

        assert_eq!(provider.sign_message("0xaaa", "hi").await.unwrap(), "0xsig");
        assert!(provider.sign_message("0xBBB", "hi").await.is_err());

        provider.disconnect();
        rx.changed().await.unwrap();
        assert!(!rx.borrow().connected);
        assert!(provider.sign_message("0xAAA", "hi").await.is_err());
    }

    #[tokio::test]
    async fn test_no_wallet_provider_cannot_sign() {
        let provider = NoWalletProvider::new();
        assert!(!provider.connection().borrow().connected);
        let err = provider.sign_message("0xAAA", "hi").await.unwrap_err();
        assert!(matches!(err, PassageError::Wallet(_)));
    }
}
