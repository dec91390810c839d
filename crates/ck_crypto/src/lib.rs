//! ck_crypto — Chatkeys cryptographic components
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - One explicitly constructed [`CryptoEngine`] handle is shared by every
//!   component. There is no module-level engine state.
//! - Zeroize all secret material on drop.
//!
//! # Module layout
//! - `engine`    — engine handle: randomness, Argon2id, crypto-box, secretbox, ready signal
//! - `kdf`       — passcode + salt → 32-byte secretbox key
//! - `keys`      — X25519 key pairs, identities, private-key wrapping at rest
//! - `envelope`  — dual-seal message envelope (one half per party)
//! - `encoding`  — base64 / hex helpers for the transport-safe wire format
//! - `error`     — unified error type

pub mod encoding;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;

pub use engine::{CryptoEngine, KdfLimits};
pub use envelope::{MessageCrypto, MessageEnvelope, SealedHalf};
pub use error::CryptoError;
pub use kdf::{DerivedKey, KeyDerivation};
pub use keys::{KeyManagement, KeyPair, WrappedKeyMaterial, WrappedPrivateKey};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{CryptoEngine, KdfLimits};

    /// Engine with minimal Argon2 cost so tests stay fast.
    pub fn fast_engine() -> CryptoEngine {
        CryptoEngine::new(KdfLimits::new(1024, 1, 1).unwrap())
    }
}
