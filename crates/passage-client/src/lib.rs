/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public passage client crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod http;
pub mod session;
pub mod types;
pub mod wallet;

// Re-export commonly used types from auth
pub use auth::{
    FileStorage,
    KeyValueStorage,
    MemoryStorage,
    NoopStorage,
    TokenClaims,
    TokenEvent,
    TokenRefresher,
    TokenStore,
};

// Re-export commonly used types from http
pub use http::{
    AuthError,
    AuthErrorKind,
    ClientConfig,
    HttpTransport,
    IdentityClient,
    PassageError,
    RefreshEndpoint,
    Remedy,
    Result,
};

// Re-export commonly used types from session
pub use session::{
    LoginOutcome,
    LogoutReason,
    RegistrationFlow,
    RegistrationProfile,
    Session,
    SessionEvent,
    SessionState,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from wallet
pub use wallet::{
    EvmWalletSigner,
    LocalWalletProvider,
    MockWalletSigner,
    NoWalletProvider,
    WalletConnection,
    WalletLoginCoordinator,
    WalletLoginOutcome,
    WalletProvider,
    WalletSessionGuard,
    WalletSigner,
};
