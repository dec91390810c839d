//! Local key store: user → wrapped key record.
//!
//! Exactly one record per user. `save` refuses to overwrite, `update`
//! refuses to create, and `created_at` never changes after the first save.

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};

use crate::{
    db::{Database, IndexValue},
    error::StoreError,
    models::{EncryptedKeyRecord, NewKeyRecord},
    schema::CollectionSchema,
};

pub const KEY_COLLECTION: &str = "user_keys";
pub const CREATED_AT_INDEX: &str = "by_created_at";

pub fn key_collection_schema() -> CollectionSchema {
    CollectionSchema::new(KEY_COLLECTION, "user").with_index(CREATED_AT_INDEX, "createdAt")
}

#[derive(Clone)]
pub struct KeyStore {
    db: Database,
}

impl KeyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Declare the key collection. Idempotent.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.db.initialize(&[key_collection_schema()]).await
    }

    pub async fn save(&self, record: &NewKeyRecord) -> Result<EncryptedKeyRecord, StoreError> {
        validate(record)?;
        let now = now();
        let stored = self
            .db
            .insert(KEY_COLLECTION, &record.stamped(now, now))
            .await
            .map_err(|e| match e {
                StoreError::DuplicateKey { .. } => StoreError::DuplicateKey {
                    key: record.user.clone(),
                },
                other => other,
            })?;
        info!("[keystore] saved key record for user={}", stored.user);
        Ok(stored)
    }

    pub async fn get(&self, user: &str) -> Result<Option<EncryptedKeyRecord>, StoreError> {
        self.db.get(KEY_COLLECTION, user).await
    }

    /// Replace every field except `created_at`.
    pub async fn update(&self, record: &NewKeyRecord) -> Result<EncryptedKeyRecord, StoreError> {
        validate(record)?;
        let now = now();
        let stored = self
            .db
            .replace(KEY_COLLECTION, &record.stamped(now, now), &["createdAt"])
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: record.user.clone(),
            })?;
        info!("[keystore] updated key record for user={}", stored.user);
        Ok(stored)
    }

    /// Returns true if a record was removed.
    pub async fn delete(&self, user: &str) -> Result<bool, StoreError> {
        let removed = self.db.delete(KEY_COLLECTION, user).await?;
        debug!("[keystore] delete user={} removed={}", user, removed);
        Ok(removed)
    }

    pub async fn exists(&self, user: &str) -> Result<bool, StoreError> {
        self.db.exists(KEY_COLLECTION, user).await
    }

    /// Records created in `[from, to]`, oldest first.
    pub async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EncryptedKeyRecord>, StoreError> {
        self.db
            .range(
                KEY_COLLECTION,
                CREATED_AT_INDEX,
                Some(IndexValue::Int(from.timestamp_millis())),
                Some(IndexValue::Int(to.timestamp_millis())),
            )
            .await
    }
}

/// Millisecond precision, matching what is persisted.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn validate(record: &NewKeyRecord) -> Result<(), StoreError> {
    let required = [
        ("user", &record.user),
        ("publicKey", &record.public_key),
        ("encryptedPrivateKey", &record.encrypted_private_key),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(StoreError::Validation(format!("missing required field `{field}`")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(user: &str, tag: &str) -> NewKeyRecord {
        NewKeyRecord {
            user: user.into(),
            public_key: format!("pk-{tag}"),
            encrypted_private_key: format!("esk-{tag}"),
            private_key_nonce: format!("nonce-{tag}"),
            passcode_salt: format!("salt-{tag}"),
        }
    }

    async fn store() -> KeyStore {
        let store = KeyStore::new(Database::open_in_memory().await.unwrap());
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn save_then_get() {
        let store = store().await;
        let saved = store.save(&record("alice", "1")).await.unwrap();
        assert_eq!(saved.user, "alice");
        assert_eq!(saved.created_at, saved.updated_at);

        let loaded = store.get("alice").await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert!(store.get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_save_is_duplicate() {
        let store = store().await;
        store.save(&record("alice", "1")).await.unwrap();
        let err = store.save(&record("alice", "2")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref key } if key == "alice"));
        assert_eq!(store.get("alice").await.unwrap().unwrap().public_key, "pk-1");
    }

    #[tokio::test]
    async fn concurrent_saves_admit_one() {
        let store = store().await;
        let rec = record("alice", "1");
        let (a, b) = tokio::join!(store.save(&rec), store.save(&rec));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let failed = if a.is_err() { a } else { b };
        assert!(matches!(failed, Err(StoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn update_requires_existing() {
        let store = store().await;
        let err = store.update(&record("ghost", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { ref key } if key == "ghost"));
        assert!(!store.exists("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let store = store().await;
        let original = store.save(&record("alice", "1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let updated = store.update(&record("alice", "2")).await.unwrap();
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at > original.updated_at);
        assert_eq!(updated.public_key, "pk-2");
        assert_eq!(updated.encrypted_private_key, "esk-2");
        assert_eq!(updated.private_key_nonce, "nonce-2");
        assert_eq!(updated.passcode_salt, "salt-2");
        assert_eq!(store.get("alice").await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn required_fields_are_validated() {
        let store = store().await;
        let mut rec = record("alice", "1");
        rec.public_key = String::new();
        assert!(matches!(store.save(&rec).await, Err(StoreError::Validation(_))));

        let rec = record("  ", "1");
        assert!(matches!(store.save(&rec).await, Err(StoreError::Validation(_))));

        let mut rec = record("alice", "1");
        rec.encrypted_private_key = String::new();
        assert!(matches!(store.update(&rec).await, Err(StoreError::Validation(_))));
        assert!(!store.exists("alice").await.unwrap());
    }

    #[tokio::test]
    async fn delete_and_exists() {
        let store = store().await;
        store.save(&record("alice", "1")).await.unwrap();
        assert!(store.exists("alice").await.unwrap());
        assert!(store.delete("alice").await.unwrap());
        assert!(!store.exists("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
        // A deleted user can be set up again.
        store.save(&record("alice", "3")).await.unwrap();
    }

    #[tokio::test]
    async fn lists_by_creation_time() {
        let store = store().await;
        let start = now();
        store.save(&record("first", "1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.save(&record("second", "2")).await.unwrap();
        let end = now();

        let listed = store.list_created_between(start, end).await.unwrap();
        let users: Vec<_> = listed.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, ["first", "second"]);

        let later = store
            .list_created_between(end + chrono::Duration::seconds(1), end + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn operations_fail_after_close() {
        let store = store().await;
        store.database().close().await;
        assert!(matches!(store.get("alice").await, Err(StoreError::Closed)));
        assert!(matches!(store.save(&record("alice", "1")).await, Err(StoreError::Closed)));
    }
}
