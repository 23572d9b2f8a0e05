/*
[INPUT]:  Message to sign and wallet key material
[OUTPUT]: Signature string for wallet login
[POS]:    Wallet layer - signer abstraction
[UPDATE]: When adding new wallet types or changing signature format
*/

use async_trait::async_trait;

use crate::http::{PassageError, Result};

/// Trait for wallet signing operations
///
/// The trait is async to support hardware wallets and browser extensions, which
/// suspend until the user answers the signature prompt.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Get the wallet address
    fn address(&self) -> &str;

    /// Sign a message and return the hex-encoded signature (0x...)
    ///
    /// A user refusing the prompt is reported as [`PassageError::SignatureRejected`].
    async fn sign_message(&self, message: &str) -> Result<String>;
}

/// Mock wallet signer for testing
#[derive(Debug, Clone)]
pub struct MockWalletSigner {
    address: String,
    signature: String,
    reject: bool,
}

impl MockWalletSigner {
    /// Create a new mock signer with predetermined signature
    pub fn new(address: &str, signature: &str) -> Self {
        Self {
            address: address.to_string(),
            signature: signature.to_string(),
            reject: false,
        }
    }

    /// A signer whose user always declines the prompt
    pub fn rejecting(address: &str) -> Self {
        Self {
            address: address.to_string(),
            signature: String::new(),
            reject: true,
        }
    }
}

#[async_trait]
impl WalletSigner for MockWalletSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_message(&self, _message: &str) -> Result<String> {
        if self.reject {
            return Err(PassageError::SignatureRejected);
        }
        Ok(self.signature.clone())
    }
}
