//! Token Store
//!
//! Shared bookkeeping for issued tokens: one entry per live token, keyed by
//! the SHA-256 digest of the bearer string so raw tokens are never kept at
//! rest. Entries expire with the token's own embedded expiry and vanish
//! silently; nothing is notified.
//!
//! Token validity is self-contained in the token's signature, so the store
//! is an auxiliary: issuance proceeds even when a write fails (degraded
//! mode), and callers that want hard revocation consult [`TokenStore::get`]
//! and reject tokens absent from it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use super::secrets::token_digest;

/// A stored token entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    /// Identity the token was issued to.
    pub subject: String,
    /// Expiry, always equal to the token's embedded `exp`.
    pub expires_at: DateTime<Utc>,
}

/// Token store backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("token store unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable storage behind [`TokenStore`].
///
/// All operations must be safe under concurrent calls from arbitrarily many
/// tasks; per-key operations are linearizable.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    /// Insert or replace an entry. Re-issuing the same token is idempotent.
    async fn put(&self, key: String, entry: StoredToken) -> Result<(), StoreError>;

    /// Fetch an entry if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<StoredToken>, StoreError>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every entry whose expiry has passed; returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory backend. Expiry is enforced lazily on read plus the periodic
/// purge sweep.
pub struct MemoryTokenBackend {
    entries: RwLock<HashMap<String, StoredToken>>,
}

impl MemoryTokenBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryTokenBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenBackend for MemoryTokenBackend {
    async fn put(&self, key: String, entry: StoredToken) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key, entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredToken>, StoreError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Utc::now() => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }
        // Entry exists but has expired; drop it under the write lock.
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Utc::now())
        {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }
}

/// Shared token bookkeeping over a pluggable backend.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn TokenBackend>,
}

impl TokenStore {
    /// Build a store over the given backend.
    pub fn new(backend: Arc<dyn TokenBackend>) -> Self {
        Self { backend }
    }

    /// Build a store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTokenBackend::new()))
    }

    /// Record an issued token.
    pub async fn put(
        &self,
        token: &str,
        subject: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let entry = StoredToken {
            subject: subject.to_string(),
            expires_at,
        };
        self.backend.put(token_digest(token), entry).await
    }

    /// Look up a token's entry, if it is present and unexpired.
    pub async fn get(&self, token: &str) -> Result<Option<StoredToken>, StoreError> {
        self.backend.get(&token_digest(token)).await
    }

    /// Explicitly revoke a token's entry.
    pub async fn delete(&self, token: &str) -> Result<(), StoreError> {
        self.backend.delete(&token_digest(token)).await
    }

    /// Sweep expired entries; returns how many were dropped.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.backend.purge_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> TokenStore {
        TokenStore::in_memory()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = store();
        let expires = Utc::now() + Duration::minutes(5);

        store.put("token-a", "identity-1", expires).await.unwrap();
        let entry = store.get("token-a").await.unwrap().unwrap();
        assert_eq!(entry.subject, "identity-1");
        assert_eq!(entry.expires_at, expires);

        store.delete("token-a").await.unwrap();
        assert!(store.get("token-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_misses() {
        let store = store();
        assert!(store.get("never-stored").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reissue_is_idempotent() {
        let store = store();
        let expires = Utc::now() + Duration::minutes(5);

        store.put("token-a", "identity-1", expires).await.unwrap();
        store.put("token-a", "identity-1", expires).await.unwrap();

        let entry = store.get("token-a").await.unwrap().unwrap();
        assert_eq!(entry.subject, "identity-1");
    }

    #[tokio::test]
    async fn test_expired_entry_disappears() {
        let store = store();
        let past = Utc::now() - Duration::seconds(1);

        store.put("token-a", "identity-1", past).await.unwrap();
        assert!(store.get("token-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_counts() {
        let store = store();
        let past = Utc::now() - Duration::seconds(1);
        let future = Utc::now() + Duration::minutes(5);

        store.put("dead-1", "a", past).await.unwrap();
        store.put("dead-2", "b", past).await.unwrap();
        store.put("live", "c", future).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = store();
        store.delete("never-stored").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_puts_same_key() {
        let store = store();
        let expires = Utc::now() + Duration::minutes(5);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put("shared", "identity-1", expires).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entry = store.get("shared").await.unwrap().unwrap();
        assert_eq!(entry.subject, "identity-1");
    }
}
