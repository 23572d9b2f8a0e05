/*
[INPUT]:  Access tokens, storage backends and a refresh transport
[OUTPUT]: Token claims, freshness checks, persisted single-flight token store
[POS]:    Auth layer - credential codec and token lifecycle
[UPDATE]: When token handling or storage strategy changes
*/

pub mod jwt;
pub mod storage;
pub mod token_store;

pub use jwt::{TokenClaims, decode_claims, is_expired};
pub use storage::{
    ACCESS_TOKEN_KEY, FileStorage, KeyValueStorage, MemoryStorage, NoopStorage, REGISTRATION_EMAIL_KEY,
};
pub use token_store::{TokenEvent, TokenRefresher, TokenStore};
