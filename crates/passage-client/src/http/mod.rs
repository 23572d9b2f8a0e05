/*
[INPUT]:  HTTP client configuration and identity service endpoints
[OUTPUT]: HTTP responses and typed identity API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod identity;

pub use error::{AuthError, AuthErrorKind, PassageError, Remedy, Result};

pub use client::{ClientConfig, Endpoint, HttpTransport, NEW_ACCESS_TOKEN_HEADER, RefreshEndpoint};
pub use identity::IdentityClient;
