//! Access token store trait definition.
//!
//! [`TokenStore`] is the durable-store seam for the token lifecycle manager.
//! The operations are deliberately narrow:
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`insert`](TokenStore::insert) | Persist a new token document |
//! | [`find_by_user`](TokenStore::find_by_user) | All tokens for a user, newest first |
//! | [`find_active_by_prefix`](TokenStore::find_active_by_prefix) | Active candidates sharing a hash prefix |
//! | [`deactivate`](TokenStore::deactivate) | Atomic conditional revoke scoped to owner |
//! | [`deactivate_by_label`](TokenStore::deactivate_by_label) | Retire all active tokens for a user+label |
//! | [`touch_last_used`](TokenStore::touch_last_used) | Best-effort usage timestamp bump |
//!
//! `deactivate` must be a single atomic conditional update: under concurrent
//! revoke attempts exactly one caller observes the record, and the others
//! get `None` ("not found", which is not an error).

use async_trait::async_trait;

use crate::{
    error::StoreResult,
    types::{AccessTokenRecord, Id, NewAccessToken, UserId},
};

/// Abstract store for personal access token documents.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persists a new token with `active = true`, assigning identity and
    /// timestamps.
    async fn insert(&self, token: NewAccessToken) -> StoreResult<AccessTokenRecord>;

    /// Returns all tokens owned by `user_id`, newest first.
    async fn find_by_user(&self, user_id: &UserId) -> StoreResult<Vec<AccessTokenRecord>>;

    /// Returns the active tokens whose `hash_prefix` equals `prefix`.
    ///
    /// This is the only lookup path by secret: the prefix bounds the
    /// candidate set so the caller never verifies against the full table.
    async fn find_active_by_prefix(&self, prefix: &str) -> StoreResult<Vec<AccessTokenRecord>>;

    /// Atomically flips `active = false` on the token matching both
    /// `token_id` and `user_id`.
    ///
    /// Returns the record as it was *before* the update, or `None` if no
    /// matching active token exists. Owner scoping means a caller can only
    /// revoke their own tokens; a mismatch is indistinguishable from
    /// absence.
    async fn deactivate(
        &self,
        token_id: &Id,
        user_id: &UserId,
    ) -> StoreResult<Option<AccessTokenRecord>>;

    /// Deactivates every active token matching `user_id` and `label`,
    /// returning the records that were flipped.
    ///
    /// Used by rotate-and-retire: the caller publishes one invalidation
    /// event per returned record.
    async fn deactivate_by_label(
        &self,
        user_id: &UserId,
        label: &str,
    ) -> StoreResult<Vec<AccessTokenRecord>>;

    /// Bumps `last_used_at` (and `updated_at`) on the given token.
    ///
    /// Callers treat failures as non-fatal.
    async fn touch_last_used(&self, token_id: &Id) -> StoreResult<()>;
}
