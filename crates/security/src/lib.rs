//! Secret handling for the HASH AI worker.
//!
//! Provides:
//! - **Secret stores**: the [`SecretStore`] trait, a Vault KV v2 client and a
//!   static in-memory store for tests and local runs
//! - **Redaction**: scrubbing known secrets out of text before it is logged
//!   or returned to callers

pub mod redact;
pub mod store;
pub mod vault;

pub use redact::{contains_secret, redact_secrets};
pub use store::{SecretStore, StaticSecretStore};
pub use vault::VaultClient;
