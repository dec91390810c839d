//! Stored record types.

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use ck_crypto::keys::{WrappedKeyMaterial, WrappedPrivateKey};
use serde::{Deserialize, Serialize};

/// One user's wrapped key material, as persisted. `user` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyRecord {
    pub user: String,
    /// Base64 X25519 public key
    pub public_key: String,
    /// Base64 secretbox of the X25519 private key
    pub encrypted_private_key: String,
    /// Base64 24-byte secretbox nonce
    pub private_key_nonce: String,
    /// Base64 16-byte Argon2id salt
    pub passcode_salt: String,
    /// Set once at insert; preserved across updates.
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl WrappedKeyMaterial for EncryptedKeyRecord {
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

/// Caller-supplied fields for `save` / `update`; timestamps are stamped by
/// the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKeyRecord {
    pub user: String,
    pub public_key: String,
    pub encrypted_private_key: String,
    pub private_key_nonce: String,
    pub passcode_salt: String,
}

impl NewKeyRecord {
    pub fn from_wrapped(
        user: impl Into<String>,
        public_key: impl Into<String>,
        wrapped: WrappedPrivateKey,
    ) -> Self {
        Self {
            user: user.into(),
            public_key: public_key.into(),
            encrypted_private_key: wrapped.encrypted_private_key,
            private_key_nonce: wrapped.private_key_nonce,
            passcode_salt: wrapped.passcode_salt,
        }
    }

    pub(crate) fn stamped(&self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> EncryptedKeyRecord {
        EncryptedKeyRecord {
            user: self.user.clone(),
            public_key: self.public_key.clone(),
            encrypted_private_key: self.encrypted_private_key.clone(),
            private_key_nonce: self.private_key_nonce.clone(),
            passcode_salt: self.passcode_salt.clone(),
            created_at,
            updated_at,
        }
    }
}
