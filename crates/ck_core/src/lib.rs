//! ck_core — Chatkeys crypto manager
//!
//! Ties the crypto components and the local key store together behind one
//! async facade:
//! - `config`  — database location and Argon2 limits (env overridable)
//! - `session` — unlocked private keys, held in memory per identity
//! - `manager` — key setup, unlock, message encryption, logout
//! - `error`   — the error surface callers match on

pub mod config;
pub mod error;
pub mod manager;
pub mod session;

pub use config::ManagerConfig;
pub use error::ManagerError;
pub use manager::{CryptoManager, DecryptedMessage, SealedBy, UserKeySetup};
pub use session::SessionRegistry;

pub use ck_crypto::{KdfLimits, MessageEnvelope, SealedHalf};
pub use ck_store::EncryptedKeyRecord;
