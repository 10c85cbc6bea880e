//! SSH key store trait definition.
//!
//! [`SshKeyStore`] is the durable-store seam for the key registry. The
//! store enforces a unique index on `fingerprint`; a violated insert
//! surfaces as [`StoreError::Duplicate`](crate::StoreError::Duplicate) and
//! is the *only* mechanism that makes concurrent identical-key creation
//! converge to a single row. Implementations must make the
//! check-and-insert atomic.

use async_trait::async_trait;

use crate::{
    error::StoreResult,
    types::{Id, NewSshKey, SshKeyRecord, UserId},
};

/// Abstract store for SSH public key documents.
#[async_trait]
pub trait SshKeyStore: Send + Sync {
    /// Persists a new key, assigning identity and timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`](crate::StoreError::Duplicate) if a
    /// key with the same fingerprint already exists, regardless of owner.
    async fn insert(&self, key: NewSshKey) -> StoreResult<SshKeyRecord>;

    /// Returns all keys owned by `user_id`, newest first.
    async fn find_by_user(&self, user_id: &UserId) -> StoreResult<Vec<SshKeyRecord>>;

    /// Returns the key with the given fingerprint, if any.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> StoreResult<Option<SshKeyRecord>>;

    /// Deletes the key matching both `key_id` and `user_id`.
    ///
    /// Returns the deleted record, or `None` if no matching key exists.
    /// Owner scoping means absence and foreign ownership are
    /// indistinguishable to the caller.
    async fn delete(&self, key_id: &Id, user_id: &UserId) -> StoreResult<Option<SshKeyRecord>>;
}
