//! Crypto manager: the one surface callers use.
//!
//! Owns one instance of each component, all sharing a single injected
//! `CryptoEngine`. Initialization (engine self test plus key-store schema)
//! happens at most once and is awaited lazily by every operation.
//!
//! Key lifecycle per identity:
//!   setup_user_keys → store_user_keys  (record persisted, session open)
//!   end_session                        (record kept, session closed)
//!   unlock                             (session reopened from passcode)
//!   forget_device                      (session closed, record deleted)

use ck_crypto::{
    encoding::from_base64_fixed, engine::BOX_KEY_SIZE, keys::WrappedKeyMaterial, CryptoEngine,
    CryptoError, KeyDerivation, KeyManagement, MessageCrypto, MessageEnvelope, SealedHalf,
};
use ck_store::{Database, EncryptedKeyRecord, KeyStore, NewKeyRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{config::ManagerConfig, error::ManagerError, session::SessionRegistry};

/// Which key authenticated a decrypted half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SealedBy {
    /// Sealed by the named counterpart.
    Counterpart,
    /// Sealed by us to ourselves (a `for_sender` half).
    OwnCopy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedMessage {
    pub text: String,
    pub sealed_by: SealedBy,
}

/// Public result of key setup. Carries the wrapped private key only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeySetup {
    pub name: String,
    pub public_key: String,
    pub encrypted_private_key: String,
    pub private_key_nonce: String,
    pub passcode_salt: String,
}

impl WrappedKeyMaterial for UserKeySetup {
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

pub struct CryptoManager {
    engine: CryptoEngine,
    kdf: KeyDerivation,
    keys: KeyManagement,
    messages: MessageCrypto,
    store: KeyStore,
    sessions: SessionRegistry,
    ready: OnceCell<()>,
}

impl CryptoManager {
    /// Wire the components around `engine` and `db`. Nothing is touched
    /// until the first operation (or an explicit `init`).
    pub fn new(engine: CryptoEngine, db: Database) -> Self {
        Self {
            kdf: KeyDerivation::new(engine.clone()),
            keys: KeyManagement::new(engine.clone()),
            messages: MessageCrypto::new(engine.clone()),
            store: KeyStore::new(db),
            sessions: SessionRegistry::new(),
            ready: OnceCell::new(),
            engine,
        }
    }

    /// Open the database described by `config` and build a manager on it.
    pub async fn open(config: &ManagerConfig) -> Result<Self, ManagerError> {
        let db = match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|source| ManagerError::Io { context: "open", source })?;
                }
                Database::open(path).await
            }
            None => Database::open_in_memory().await,
        }
        .map_err(ManagerError::storage("open"))?;

        Ok(Self::new(CryptoEngine::new(config.kdf), db))
    }

    /// Bring the manager to Ready. Idempotent and safe to race; a failed
    /// attempt leaves it uninitialized so the next call retries.
    pub async fn init(&self) -> Result<(), ManagerError> {
        self.ready
            .get_or_try_init(|| async {
                self.engine.ready().await.map_err(ManagerError::crypto("init"))?;
                self.store.initialize().await.map_err(ManagerError::storage("init"))?;
                info!("[manager] ready (kdf={:?})", self.engine.limits());
                Ok::<(), ManagerError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Fresh random identity handle (hex).
    pub fn generate_identity(&self) -> String {
        self.keys.generate_identity()
    }

    /// Generate a key pair and wrap its private half under `passcode`.
    /// Nothing is persisted; see `store_user_keys`.
    pub async fn setup_user_keys(
        &self,
        name: &str,
        passcode: &str,
    ) -> Result<UserKeySetup, ManagerError> {
        self.init().await?;
        require("name", name)?;
        require_passcode(passcode)?;

        let pair = self.keys.generate_key_pair();
        let wrapped = self
            .keys
            .encrypt_private_key(&self.kdf, &pair.private_key, passcode)
            .map_err(ManagerError::crypto("setup_user_keys"))?;

        info!("[manager] setup_user_keys: name={} public_key={}", name, pair.public_key);
        Ok(UserKeySetup {
            name: name.to_string(),
            public_key: pair.public_key,
            encrypted_private_key: wrapped.encrypted_private_key,
            private_key_nonce: wrapped.private_key_nonce,
            passcode_salt: wrapped.passcode_salt,
        })
    }

    /// Persist `setup` under `identity` and open a session for it. The
    /// passcode is checked before anything is written.
    pub async fn store_user_keys(
        &self,
        identity: &str,
        setup: &UserKeySetup,
        passcode: &str,
    ) -> Result<EncryptedKeyRecord, ManagerError> {
        self.init().await?;
        require("identity", identity)?;
        require_passcode(passcode)?;

        let private_key = self.open_wrapped("store_user_keys", setup, &setup.public_key, passcode)?;
        let record = NewKeyRecord {
            user: identity.to_string(),
            public_key: setup.public_key.clone(),
            encrypted_private_key: setup.encrypted_private_key.clone(),
            private_key_nonce: setup.private_key_nonce.clone(),
            passcode_salt: setup.passcode_salt.clone(),
        };
        let stored = self
            .store
            .save(&record)
            .await
            .map_err(ManagerError::storage("store_user_keys"))?;

        self.sessions
            .open(identity, stored.public_key.clone(), private_key)
            .await;
        info!("[manager] store_user_keys: identity={} name={}", identity, setup.name);
        Ok(stored)
    }

    /// Login: unwrap the stored private key and open a session.
    pub async fn unlock(&self, identity: &str, passcode: &str) -> Result<(), ManagerError> {
        self.init().await?;
        require_passcode(passcode)?;

        let record = self.load(identity, "unlock").await?;
        let private_key = match self.open_wrapped("unlock", &record, &record.public_key, passcode) {
            Ok(key) => key,
            Err(e) => {
                warn!("[manager] unlock failed: identity={} error={}", identity, e);
                return Err(e);
            }
        };
        self.sessions
            .open(identity, record.public_key.clone(), private_key)
            .await;
        info!("[manager] unlock: identity={}", identity);
        Ok(())
    }

    /// Seal `message` for `recipient_public_key` and for ourselves.
    pub async fn encrypt_message(
        &self,
        message: &str,
        recipient_public_key: &str,
        sender_public_key: &str,
        own_identity: &str,
    ) -> Result<MessageEnvelope, ManagerError> {
        self.init().await?;
        require_public_key("recipient public key", recipient_public_key)?;
        require_public_key("sender public key", sender_public_key)?;

        let record = self.load(own_identity, "encrypt_message").await?;
        if record.public_key != sender_public_key {
            return Err(ManagerError::Validation(format!(
                "sender public key does not belong to identity {own_identity}"
            )));
        }

        let envelope = self
            .sessions
            .with_keys(own_identity, |session| {
                self.messages.encrypt_for_both(
                    message.as_bytes(),
                    recipient_public_key,
                    &session.public_key,
                    &session.private_key,
                )
            })
            .await
            .ok_or_else(|| locked(own_identity))?
            .map_err(ManagerError::crypto("encrypt_message"))?;

        debug!("[manager] encrypt_message: identity={} bytes={}", own_identity, message.len());
        Ok(envelope)
    }

    /// Open one envelope half. `counterpart_public_key` is the other
    /// party's key. A half we sealed to ourselves also opens, so the sender
    /// can reread `for_sender` while naming the recipient; the result then
    /// says `SealedBy::OwnCopy` and must not be attributed to the counterpart.
    pub async fn decrypt_message(
        &self,
        half: &SealedHalf,
        counterpart_public_key: &str,
        own_identity: &str,
    ) -> Result<DecryptedMessage, ManagerError> {
        self.init().await?;
        require_public_key("counterpart public key", counterpart_public_key)?;

        self.load(own_identity, "decrypt_message").await?;
        let (opened, sealed_by) = self
            .sessions
            .with_keys(own_identity, |session| {
                let own_key = session.public_key.as_str();
                let first = if counterpart_public_key == own_key {
                    SealedBy::OwnCopy
                } else {
                    SealedBy::Counterpart
                };
                match self.messages.decrypt(half, counterpart_public_key, &session.private_key) {
                    Ok(opened) => Ok((opened, first)),
                    Err(CryptoError::Decryption) if first == SealedBy::Counterpart => self
                        .messages
                        .decrypt(half, own_key, &session.private_key)
                        .map(|opened| (opened, SealedBy::OwnCopy)),
                    Err(e) => Err(e),
                }
            })
            .await
            .ok_or_else(|| locked(own_identity))?
            .map_err(ManagerError::crypto("decrypt_message"))?;

        let text = String::from_utf8(opened.to_vec()).map_err(|_| ManagerError::Decryption)?;
        debug!("[manager] decrypt_message: identity={} sealed_by={:?}", own_identity, sealed_by);
        Ok(DecryptedMessage { text, sealed_by })
    }

    /// Non-destructive logout: drop the unlocked key, keep the record.
    /// Returns true if a session was open.
    pub async fn end_session(&self, identity: &str) -> Result<bool, ManagerError> {
        self.init().await?;
        let ended = self.sessions.end(identity).await;
        info!("[manager] end_session: identity={} was_open={}", identity, ended);
        Ok(ended)
    }

    /// Destructive logout: drop the session and delete the stored record.
    /// Returns true if a record was deleted.
    pub async fn forget_device(&self, identity: &str) -> Result<bool, ManagerError> {
        self.init().await?;
        self.sessions.end(identity).await;
        let removed = self
            .store
            .delete(identity)
            .await
            .map_err(ManagerError::storage("forget_device"))?;
        info!("[manager] forget_device: identity={} removed={}", identity, removed);
        Ok(removed)
    }

    /// Replace the identity's key pair with a fresh one wrapped under
    /// `passcode` (new salt and nonce). `created_at` is kept. Messages
    /// sealed to the old public key can no longer be opened.
    pub async fn rotate_keys(
        &self,
        identity: &str,
        passcode: &str,
    ) -> Result<EncryptedKeyRecord, ManagerError> {
        self.init().await?;
        require_passcode(passcode)?;

        let current = self.load(identity, "rotate_keys").await?;
        self.open_wrapped("rotate_keys", &current, &current.public_key, passcode)?;

        let pair = self.keys.generate_key_pair();
        let wrapped = self
            .keys
            .encrypt_private_key(&self.kdf, &pair.private_key, passcode)
            .map_err(ManagerError::crypto("rotate_keys"))?;
        let updated = self
            .store
            .update(&NewKeyRecord::from_wrapped(identity, pair.public_key.clone(), wrapped))
            .await
            .map_err(ManagerError::storage("rotate_keys"))?;

        self.sessions
            .open(identity, pair.public_key.clone(), pair.private_key)
            .await;
        info!("[manager] rotate_keys: identity={} public_key={}", identity, updated.public_key);
        Ok(updated)
    }

    /// Stored public record for `identity`.
    pub async fn key_record(&self, identity: &str) -> Result<EncryptedKeyRecord, ManagerError> {
        self.init().await?;
        self.load(identity, "key_record").await
    }

    /// End all sessions and close the database. Safe to call twice.
    pub async fn shutdown(&self) {
        let ended = self.sessions.end_all().await;
        self.store.database().close().await;
        debug!("[manager] shutdown: sessions_ended={}", ended);
    }

    async fn load(
        &self,
        identity: &str,
        context: &'static str,
    ) -> Result<EncryptedKeyRecord, ManagerError> {
        require("identity", identity)?;
        self.store
            .get(identity)
            .await
            .map_err(ManagerError::storage(context))?
            .ok_or_else(|| ManagerError::KeyNotFound {
                identity: identity.to_string(),
            })
    }

    /// Unwrap and check the private key really belongs to `public_key`.
    fn open_wrapped(
        &self,
        context: &'static str,
        wrapped: &impl WrappedKeyMaterial,
        public_key: &str,
        passcode: &str,
    ) -> Result<Zeroizing<String>, ManagerError> {
        let private_key = self
            .keys
            .decrypt_private_key(&self.kdf, wrapped, passcode)
            .map_err(ManagerError::crypto(context))?;
        let derived_public = self
            .keys
            .public_key_for(&private_key)
            .map_err(ManagerError::crypto(context))?;
        if derived_public != public_key {
            return Err(ManagerError::Crypto {
                context,
                source: CryptoError::InvalidKey("private key does not match public key".into()),
            });
        }
        Ok(private_key)
    }
}

/// Passcodes are used verbatim; only the empty string is refused.
fn require_passcode(passcode: &str) -> Result<(), ManagerError> {
    if passcode.is_empty() {
        Err(ManagerError::Validation("passcode must not be empty".into()))
    } else {
        Ok(())
    }
}

/// Base64 of exactly 32 bytes.
fn require_public_key(field: &str, value: &str) -> Result<(), ManagerError> {
    require(field, value)?;
    from_base64_fixed::<BOX_KEY_SIZE>(value, field)
        .map(|_| ())
        .map_err(|e| ManagerError::Validation(format!("malformed {field}: {e}")))
}

fn require(field: &str, value: &str) -> Result<(), ManagerError> {
    if value.trim().is_empty() {
        Err(ManagerError::Validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

fn locked(identity: &str) -> ManagerError {
    ManagerError::SessionLocked {
        identity: identity.to_string(),
    }
}
