/*
[INPUT]:  Wallet signers, provider connection events and the session
[OUTPUT]: Wallet login, disconnect/switch guarding, signing backends
[POS]:    Wallet layer - wallet integration
[UPDATE]: When adding wallet types or reactive behaviours
*/

pub mod coordinator;
pub mod evm;
pub mod guard;
pub mod provider;
pub mod signer;

pub use coordinator::{WalletLoginCoordinator, WalletLoginOutcome, challenge_message};
pub use evm::EvmWalletSigner;
pub use guard::{DEFAULT_DISCONNECT_DEBOUNCE, WalletSessionGuard};
pub use provider::{LocalWalletProvider, NoWalletProvider, WalletConnection, WalletProvider};
pub use signer::{MockWalletSigner, WalletSigner};
