//! Session registry: unlocked private keys, in memory only.
//!
//! A session opens when a user unlocks with their passcode and ends on
//! `end`/`end_all`. Dropping a session zeroizes its key. Nothing here is
//! ever written to disk.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// One unlocked identity.
pub struct SessionKeys {
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Thread-safe registry handle. Clone to share.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, SessionKeys>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) the session for `identity`.
    pub async fn open(&self, identity: &str, public_key: String, private_key: Zeroizing<String>) {
        let mut guard = self.inner.write().await;
        guard.insert(
            identity.to_string(),
            SessionKeys {
                public_key,
                private_key,
            },
        );
    }

    /// End one session. Returns true if one was open.
    pub async fn end(&self, identity: &str) -> bool {
        self.inner.write().await.remove(identity).is_some()
    }

    /// End every session. Returns how many were open.
    pub async fn end_all(&self) -> usize {
        let mut guard = self.inner.write().await;
        let count = guard.len();
        guard.clear();
        count
    }

    pub async fn is_open(&self, identity: &str) -> bool {
        self.inner.read().await.contains_key(identity)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Run `f` with the session's keys, or return `None` if locked.
    /// The key never leaves the registry.
    pub async fn with_keys<F, R>(&self, identity: &str, f: F) -> Option<R>
    where
        F: FnOnce(&SessionKeys) -> R,
    {
        let guard = self.inner.read().await;
        guard.get(identity).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    #[tokio::test]
    async fn open_then_end() {
        let sessions = SessionRegistry::new();
        assert!(!sessions.is_open("alice").await);

        sessions.open("alice", "pk".into(), key("sk")).await;
        assert!(sessions.is_open("alice").await);
        let seen = sessions.with_keys("alice", |k| k.private_key.to_string()).await;
        assert_eq!(seen.as_deref(), Some("sk"));

        assert!(sessions.end("alice").await);
        assert!(!sessions.end("alice").await);
        assert!(sessions.with_keys("alice", |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn reopen_replaces_keys() {
        let sessions = SessionRegistry::new();
        sessions.open("alice", "pk1".into(), key("sk1")).await;
        sessions.open("alice", "pk2".into(), key("sk2")).await;
        assert_eq!(sessions.len().await, 1);
        let pk = sessions.with_keys("alice", |k| k.public_key.clone()).await;
        assert_eq!(pk.as_deref(), Some("pk2"));
    }

    #[tokio::test]
    async fn end_all_clears_every_identity() {
        let sessions = SessionRegistry::new();
        sessions.open("alice", "pk".into(), key("a")).await;
        sessions.open("bob", "pk".into(), key("b")).await;
        assert_eq!(sessions.end_all().await, 2);
        assert!(sessions.is_empty().await);
        assert_eq!(sessions.end_all().await, 0);
    }

    #[tokio::test]
    async fn debug_output_redacts_private_key() {
        let sessions = SessionRegistry::new();
        sessions.open("alice", "pk".into(), key("super-secret")).await;
        let dbg = sessions.with_keys("alice", |k| format!("{k:?}")).await.unwrap();
        assert!(!dbg.contains("super-secret"));
    }
}
