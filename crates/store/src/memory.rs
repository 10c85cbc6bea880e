//! In-memory store backends.
//!
//! Reference implementations of [`TokenStore`] and [`SshKeyStore`] backed by
//! [`parking_lot::RwLock`]. Primarily intended for tests, but faithful to
//! the semantics the production document store provides:
//!
//! - **Atomic conditional updates**: `deactivate` finds and flips a record
//!   under a single write lock, so concurrent revokes see exactly one winner.
//! - **Unique fingerprint index**: `insert` on the key store checks and
//!   inserts under one write lock, rejecting duplicates with
//!   [`StoreError::Duplicate`] exactly as a unique index would.
//!
//! # Cloning
//!
//! Both backends are cheaply cloneable via [`Arc`]; clones share the same
//! underlying data, which lets tests hand "the same database" to several
//! simulated service instances.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    error::{StoreError, StoreResult},
    ssh_key_store::SshKeyStore,
    token_store::TokenStore,
    types::{AccessTokenRecord, Id, NewAccessToken, NewSshKey, SshKeyRecord, UserId},
};

/// In-memory [`TokenStore`] implementation.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    tokens: Arc<RwLock<Vec<AccessTokenRecord>>>,
}

impl MemoryTokenStore {
    /// Creates an empty token store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored token documents, active or not.
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// Returns `true` if the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: NewAccessToken) -> StoreResult<AccessTokenRecord> {
        let now = Utc::now();
        let record = AccessTokenRecord {
            id: Id::generate(),
            user_id: token.user_id,
            label: token.label,
            hash: token.hash,
            hash_prefix: token.hash_prefix,
            algorithm: token.algorithm,
            scopes: token.scopes,
            active: true,
            created_at: now,
            updated_at: now,
            expires_at: token.expires_at,
            last_used_at: None,
        };
        self.tokens.write().push(record.clone());
        Ok(record)
    }

    async fn find_by_user(&self, user_id: &UserId) -> StoreResult<Vec<AccessTokenRecord>> {
        let mut matched: Vec<AccessTokenRecord> = self
            .tokens
            .read()
            .iter()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_active_by_prefix(&self, prefix: &str) -> StoreResult<Vec<AccessTokenRecord>> {
        Ok(self
            .tokens
            .read()
            .iter()
            .filter(|t| t.active && t.hash_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn deactivate(
        &self,
        token_id: &Id,
        user_id: &UserId,
    ) -> StoreResult<Option<AccessTokenRecord>> {
        let mut tokens = self.tokens.write();
        for token in tokens.iter_mut() {
            if &token.id == token_id && &token.user_id == user_id && token.active {
                let before = token.clone();
                token.active = false;
                token.updated_at = Utc::now();
                return Ok(Some(before));
            }
        }
        Ok(None)
    }

    async fn deactivate_by_label(
        &self,
        user_id: &UserId,
        label: &str,
    ) -> StoreResult<Vec<AccessTokenRecord>> {
        let mut tokens = self.tokens.write();
        let now = Utc::now();
        let mut flipped = Vec::new();
        for token in tokens.iter_mut() {
            if &token.user_id == user_id && token.label == label && token.active {
                flipped.push(token.clone());
                token.active = false;
                token.updated_at = now;
            }
        }
        Ok(flipped)
    }

    async fn touch_last_used(&self, token_id: &Id) -> StoreResult<()> {
        let mut tokens = self.tokens.write();
        let token = tokens
            .iter_mut()
            .find(|t| &t.id == token_id)
            .ok_or_else(|| StoreError::not_found(format!("token {token_id}")))?;
        let now = Utc::now();
        token.last_used_at = Some(now);
        token.updated_at = now;
        Ok(())
    }
}

/// In-memory [`SshKeyStore`] implementation with a unique fingerprint index.
#[derive(Clone, Default)]
pub struct MemorySshKeyStore {
    /// Keyed by fingerprint — the map key *is* the unique index.
    keys: Arc<RwLock<HashMap<String, SshKeyRecord>>>,
}

impl MemorySshKeyStore {
    /// Creates an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Returns `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl SshKeyStore for MemorySshKeyStore {
    async fn insert(&self, key: NewSshKey) -> StoreResult<SshKeyRecord> {
        let mut keys = self.keys.write();
        // Check-and-insert happens under one write lock; this is the
        // unique-index guarantee concurrent creators rely on.
        if keys.contains_key(&key.fingerprint) {
            return Err(StoreError::duplicate("fingerprint", key.fingerprint));
        }
        let now = Utc::now();
        let record = SshKeyRecord {
            id: Id::generate(),
            user_id: key.user_id,
            key_name: key.key_name,
            public_key: key.public_key,
            fingerprint: key.fingerprint.clone(),
            created_at: now,
            updated_at: now,
        };
        keys.insert(key.fingerprint, record.clone());
        Ok(record)
    }

    async fn find_by_user(&self, user_id: &UserId) -> StoreResult<Vec<SshKeyRecord>> {
        let mut matched: Vec<SshKeyRecord> = self
            .keys
            .read()
            .values()
            .filter(|k| &k.user_id == user_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> StoreResult<Option<SshKeyRecord>> {
        Ok(self.keys.read().get(fingerprint).cloned())
    }

    async fn delete(&self, key_id: &Id, user_id: &UserId) -> StoreResult<Option<SshKeyRecord>> {
        let mut keys = self.keys.write();
        let fingerprint = keys
            .values()
            .find(|k| &k.id == key_id && &k.user_id == user_id)
            .map(|k| k.fingerprint.clone());
        Ok(fingerprint.and_then(|fp| keys.remove(&fp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{new_ssh_key, new_token};

    #[tokio::test]
    async fn insert_assigns_identity_and_timestamps() {
        let store = MemoryTokenStore::new();
        let user = UserId::generate();
        let record = store.insert(new_token(&user, "ci", "aabbccdd")).await.unwrap();
        assert!(Id::is_valid(record.id.as_str()));
        assert!(record.active);
        assert_eq!(record.created_at, record.updated_at);
        assert!(record.last_used_at.is_none());
    }

    #[tokio::test]
    async fn find_by_user_is_newest_first() {
        let store = MemoryTokenStore::new();
        let user = UserId::generate();
        for label in ["one", "two", "three"] {
            store.insert(new_token(&user, label, "aabbccdd")).await.unwrap();
            // Distinct timestamps.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let tokens = store.find_by_user(&user).await.unwrap();
        let labels: Vec<&str> = tokens.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, ["three", "two", "one"]);
    }

    #[tokio::test]
    async fn deactivate_is_owner_scoped_and_single_shot() {
        let store = MemoryTokenStore::new();
        let owner = UserId::generate();
        let stranger = UserId::generate();
        let record = store.insert(new_token(&owner, "ci", "aabbccdd")).await.unwrap();

        // Wrong owner observes absence, not an error.
        assert!(store.deactivate(&record.id, &stranger).await.unwrap().is_none());

        // First revoke wins and returns the pre-update record.
        let before = store.deactivate(&record.id, &owner).await.unwrap().unwrap();
        assert!(before.active);

        // Second revoke is a no-op.
        assert!(store.deactivate(&record.id, &owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deactivate_by_label_flips_all_matches() {
        let store = MemoryTokenStore::new();
        let user = UserId::generate();
        store.insert(new_token(&user, "deploy", "aabbccdd")).await.unwrap();
        store.insert(new_token(&user, "deploy", "11223344")).await.unwrap();
        store.insert(new_token(&user, "other", "55667788")).await.unwrap();

        let flipped = store.deactivate_by_label(&user, "deploy").await.unwrap();
        assert_eq!(flipped.len(), 2);

        let remaining_active: Vec<_> = store
            .find_by_user(&user)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.active)
            .collect();
        assert_eq!(remaining_active.len(), 1);
        assert_eq!(remaining_active[0].label, "other");
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_rejected() {
        let store = MemorySshKeyStore::new();
        let user = UserId::generate();
        store.insert(new_ssh_key(&user, "SHA256:abc")).await.unwrap();

        let err = store.insert(new_ssh_key(&user, "SHA256:abc")).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_owner_scoped() {
        let store = MemorySshKeyStore::new();
        let owner = UserId::generate();
        let stranger = UserId::generate();
        let record = store.insert(new_ssh_key(&owner, "SHA256:abc")).await.unwrap();

        assert!(store.delete(&record.id, &stranger).await.unwrap().is_none());
        let deleted = store.delete(&record.id, &owner).await.unwrap().unwrap();
        assert_eq!(deleted.fingerprint, "SHA256:abc");
        assert!(store.is_empty());
    }
}
