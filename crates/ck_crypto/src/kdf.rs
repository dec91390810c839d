//! Key derivation: passcode + salt → 32-byte secretbox key (Argon2id).
//!
//! The salt is not secret; it is stored next to the wrapped private key and
//! must be supplied again to re-derive the same key.

use zeroize::Zeroizing;

use crate::{
    encoding::{from_base64_fixed, to_base64},
    engine::{CryptoEngine, KEY_SIZE, SALT_SIZE},
    error::CryptoError,
};

/// Derived key plus the salt that produced it (base64). Memory only;
/// the key is zeroized on drop.
pub struct DerivedKey {
    pub key: Zeroizing<[u8; KEY_SIZE]>,
    pub salt: String,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"<redacted>")
            .field("salt", &self.salt)
            .finish()
    }
}

pub struct KeyDerivation {
    engine: CryptoEngine,
}

impl KeyDerivation {
    pub fn new(engine: CryptoEngine) -> Self {
        Self { engine }
    }

    /// Derive a key from `passcode`. Without `existing_salt` a fresh random
    /// salt is generated; otherwise the base64 salt is decoded and reused.
    ///
    /// Identical `(passcode, salt)` always yields the identical key.
    pub fn derive(
        &self,
        passcode: &str,
        existing_salt: Option<&str>,
    ) -> Result<DerivedKey, CryptoError> {
        if passcode.is_empty() {
            return Err(CryptoError::KeyDerivation("passcode must not be empty".into()));
        }

        let salt: [u8; SALT_SIZE] = match existing_salt {
            None => self.engine.random_bytes(),
            Some(encoded) => from_base64_fixed(encoded, "salt")
                .map_err(|e| CryptoError::KeyDerivation(format!("invalid salt: {e}")))?,
        };

        let key = self.engine.derive_key(passcode.as_bytes(), &salt)?;
        Ok(DerivedKey {
            key,
            salt: to_base64(&salt),
        })
    }
}
