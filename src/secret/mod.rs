//! Secret derivation and client-local secret storage
//!
//! Secrets are derived once per order from a wallet signature over a message
//! bound to the order's nonce, then persisted so later lookups never prompt
//! the wallet again.

pub mod derive;
pub mod store;

pub use derive::{derive_secret, derive_sign_message, sha256, CommitmentDeriver};
pub use store::{MemorySecretStore, SecretMaterial, SecretStore, SqliteSecretStore};
