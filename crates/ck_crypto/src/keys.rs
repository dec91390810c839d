//! Key management
//!
//! Each user owns one long-term X25519 key pair. The public half is shared
//! freely; the private half only ever leaves memory wrapped in a secretbox
//! under a passcode-derived key:
//!
//!   salt  = 16 random bytes (fresh per wrap)
//!   key   = Argon2id(passcode, salt)
//!   nonce = 24 random bytes (fresh per wrap)
//!   wrapped = secretbox(private_key, nonce, key)
//!
//! The secretbox is authenticated, so a wrong passcode and a tampered
//! ciphertext both surface as `IncorrectPasscode`, never as altered bytes.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    encoding::{from_base64, from_base64_fixed, to_base64, to_hex},
    engine::{CryptoEngine, BOX_KEY_SIZE, NONCE_SIZE},
    error::CryptoError,
    kdf::KeyDerivation,
};

/// Size of an identity handle before hex encoding.
pub const IDENTITY_SIZE: usize = 16;

/// X25519 key pair, both halves base64.
pub struct KeyPair {
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Everything needed to unwrap a private key given the right passcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedPrivateKey {
    pub encrypted_private_key: String,
    pub private_key_nonce: String,
    pub passcode_salt: String,
}

/// Read access to wrapped key material, implemented by anything that
/// carries the three wrap fields (e.g. a persisted key record).
pub trait WrappedKeyMaterial {
    fn encrypted_private_key(&self) -> &str;
    fn private_key_nonce(&self) -> &str;
    fn passcode_salt(&self) -> &str;
}

impl WrappedKeyMaterial for WrappedPrivateKey {
    fn encrypted_private_key(&self) -> &str {
        &self.encrypted_private_key
    }

    fn private_key_nonce(&self) -> &str {
        &self.private_key_nonce
    }

    fn passcode_salt(&self) -> &str {
        &self.passcode_salt
    }
}

pub struct KeyManagement {
    engine: CryptoEngine,
}

impl KeyManagement {
    pub fn new(engine: CryptoEngine) -> Self {
        Self { engine }
    }

    pub fn generate_key_pair(&self) -> KeyPair {
        let (secret, public) = self.engine.generate_box_keypair();
        KeyPair {
            public_key: to_base64(&public),
            private_key: Zeroizing::new(to_base64(secret.as_slice())),
        }
    }

    /// 16 random bytes, hex-encoded. A handle, not a secret.
    pub fn generate_identity(&self) -> String {
        let bytes: [u8; IDENTITY_SIZE] = self.engine.random_bytes();
        to_hex(&bytes)
    }

    /// Recompute the public key belonging to a base64 private key.
    pub fn public_key_for(&self, private_key: &str) -> Result<String, CryptoError> {
        let secret = decode_private_key(private_key)?;
        Ok(to_base64(&self.engine.box_public_key(&secret)))
    }

    /// Wrap `private_key` under `passcode` with a fresh salt and nonce.
    pub fn encrypt_private_key(
        &self,
        kdf: &KeyDerivation,
        private_key: &str,
        passcode: &str,
    ) -> Result<WrappedPrivateKey, CryptoError> {
        let secret = decode_private_key(private_key)?;
        let derived = kdf.derive(passcode, None)?;
        let nonce = self.engine.random_nonce();
        let sealed = self.engine.secretbox_seal(secret.as_slice(), &nonce, &derived.key)?;

        Ok(WrappedPrivateKey {
            encrypted_private_key: to_base64(&sealed),
            private_key_nonce: to_base64(&nonce),
            passcode_salt: derived.salt.clone(),
        })
    }

    /// Unwrap a private key. Returns it base64-encoded.
    pub fn decrypt_private_key(
        &self,
        kdf: &KeyDerivation,
        wrapped: &impl WrappedKeyMaterial,
        passcode: &str,
    ) -> Result<Zeroizing<String>, CryptoError> {
        let nonce: [u8; NONCE_SIZE] = from_base64_fixed(wrapped.private_key_nonce(), "nonce")
            .map_err(|e| match e {
                CryptoError::Base64Decode(e) => {
                    CryptoError::InvalidKey(format!("private key nonce: {e}"))
                }
                other => other,
            })?;
        let sealed = from_base64(wrapped.encrypted_private_key())
            .map_err(|e| CryptoError::InvalidKey(format!("wrapped private key: {e}")))?;
        let derived = kdf.derive(passcode, Some(wrapped.passcode_salt()))?;

        let opened = self
            .engine
            .secretbox_open(&sealed, &nonce, &derived.key)
            .map_err(|e| match e {
                CryptoError::Decryption => CryptoError::IncorrectPasscode,
                other => other,
            })?;

        if opened.len() != BOX_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "Unwrapped private key must be {BOX_KEY_SIZE} bytes, got {}",
                opened.len()
            )));
        }
        Ok(Zeroizing::new(to_base64(&opened)))
    }
}

/// Decode a base64 X25519 private key into a zeroizing array.
pub(crate) fn decode_private_key(
    private_key: &str,
) -> Result<Zeroizing<[u8; BOX_KEY_SIZE]>, CryptoError> {
    let bytes = Zeroizing::new(from_base64(private_key)?);
    let array: [u8; BOX_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "Private key must be {BOX_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(Zeroizing::new(array))
}
