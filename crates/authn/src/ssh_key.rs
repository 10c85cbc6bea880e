//! SSH public key registry.
//!
//! [`KeyRegistry`] validates OpenSSH public-key text, derives the canonical
//! fingerprint, and manages the key's lifetime. Uniqueness of a key across
//! the whole deployment rests on the durable store's unique index on
//! `fingerprint` — the registry never takes its own lock, because two
//! instances racing a read-then-write would both "win". A constraint
//! violation on insert is translated back into an idempotent outcome
//! instead of surfacing as an opaque failure.
//!
//! # Fingerprints
//!
//! `SHA256:` plus the base64 of the SHA-256 digest of the decoded key-data
//! field (44 characters for a 32-byte digest). The comment field never
//! participates, so re-submitting the same key with a different comment
//! maps to the same fingerprint.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use credhub_store::{Id, NewSshKey, SshKeyRecord, SshKeyStore, UserId};

use crate::{
    bus::{InvalidationBus, InvalidationEvent},
    cache::{CacheConfig, CachedLookup, LookupCache, ssh_key_key},
    error::AuthError,
};

/// Base64 length of a SHA-256 digest.
const FINGERPRINT_B64_LEN: usize = 44;

/// Key types accepted by the registry.
const KEY_TYPES: [&str; 3] = ["ssh-rsa", "ssh-ed25519", "ssh-ecdsa"];

/// Parameters for key registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateKey {
    /// Optional human label.
    #[serde(default)]
    pub key_name: Option<String>,
    /// OpenSSH public-key text: `ssh-<type> <base64>[ comment]`.
    pub public_key: String,
}

/// Outcome of a key registration.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCreation {
    /// The key was inserted; this caller created the resource.
    Created(SshKeyRecord),
    /// The same user already holds this key; the canonical row is
    /// returned so identical concurrent submissions converge.
    AlreadyOwned(SshKeyRecord),
}

impl KeyCreation {
    /// The canonical record, regardless of which caller created it.
    pub fn record(&self) -> &SshKeyRecord {
        match self {
            Self::Created(record) | Self::AlreadyOwned(record) => record,
        }
    }
}

/// Validates OpenSSH public-key text and returns the decoded key-data
/// bytes.
///
/// # Errors
///
/// Returns [`AuthError::Validation`] when the text does not match
/// `ssh-(rsa|ed25519|ecdsa) <base64>[ comment]` or the key-data field is
/// not valid base64.
pub fn parse_public_key(public_key: &str) -> Result<Vec<u8>, AuthError> {
    let mut parts = public_key.trim().splitn(3, ' ');
    let key_type = parts.next().unwrap_or_default();
    if !KEY_TYPES.contains(&key_type) {
        return Err(AuthError::validation("invalid SSH key type"));
    }
    let key_data = parts
        .next()
        .ok_or_else(|| AuthError::validation("SSH key missing key data"))?;
    BASE64
        .decode(key_data)
        .map_err(|_| AuthError::validation("SSH key data is not valid base64"))
}

/// Computes the canonical fingerprint of decoded key-data bytes.
pub fn fingerprint_of(key_data: &[u8]) -> String {
    let digest = Sha256::digest(key_data);
    format!("SHA256:{}", BASE64.encode(digest))
}

/// Returns `true` if `fingerprint` is structurally a canonical
/// fingerprint: `SHA256:` plus exactly 44 base64 characters.
pub fn is_valid_fingerprint(fingerprint: &str) -> bool {
    let Some(b64) = fingerprint.strip_prefix("SHA256:") else {
        return false;
    };
    b64.len() == FINGERPRINT_B64_LEN
        && b64
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// SSH key registry.
///
/// Collaborators are injected at construction; cheap to clone.
#[derive(Clone)]
pub struct KeyRegistry {
    store: Arc<dyn SshKeyStore>,
    cache: Arc<dyn LookupCache>,
    bus: Arc<dyn InvalidationBus>,
    cache_config: CacheConfig,
}

impl KeyRegistry {
    /// Wires a registry from its collaborators.
    pub fn new(
        store: Arc<dyn SshKeyStore>,
        cache: Arc<dyn LookupCache>,
        bus: Arc<dyn InvalidationBus>,
        cache_config: CacheConfig,
    ) -> Self {
        Self { store, cache, bus, cache_config }
    }

    /// Registers a public key for `user_id`.
    ///
    /// Concurrent identical submissions converge on the store's unique
    /// fingerprint index: the losers re-read the canonical row. A
    /// fingerprint already held by a *different* user is a real conflict.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] for malformed key text
    /// - [`AuthError::KeyConflict`] when another user holds the key
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create(
        &self,
        user_id: &UserId,
        request: CreateKey,
    ) -> Result<KeyCreation, AuthError> {
        let key_data = parse_public_key(&request.public_key)?;
        let fingerprint = fingerprint_of(&key_data);

        let inserted = self
            .store
            .insert(NewSshKey {
                user_id: user_id.clone(),
                key_name: request.key_name.unwrap_or_default(),
                public_key: request.public_key.trim().to_string(),
                fingerprint: fingerprint.clone(),
            })
            .await;

        match inserted {
            Ok(record) => Ok(KeyCreation::Created(record)),
            Err(err) if err.is_duplicate() => {
                // Lost the insert race or re-submitted an existing key;
                // the canonical row decides which.
                let existing = self
                    .store
                    .find_by_fingerprint(&fingerprint)
                    .await?
                    .ok_or(err)?;
                if existing.user_id == *user_id {
                    debug!(%fingerprint, "identical key re-submission; returning canonical row");
                    Ok(KeyCreation::AlreadyOwned(existing))
                } else {
                    Err(AuthError::KeyConflict { fingerprint })
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lists all keys owned by `user_id`.
    ///
    /// A structurally invalid id degrades to an empty list, same as the
    /// token list path.
    pub async fn list(&self, user_id: &str) -> Result<Vec<SshKeyRecord>, AuthError> {
        let Ok(user_id) = Id::parse(user_id) else {
            debug!(user_id, "malformed user id; returning empty key list");
            return Ok(Vec::new());
        };
        Ok(self.store.find_by_user(&user_id).await?)
    }

    /// Removes the key matching `(key_id, user_id)`.
    ///
    /// Returns `false` when no matching key exists — not an error. On
    /// success the local cache entry is evicted before this method
    /// returns, and a best-effort invalidation event is published.
    #[instrument(skip(self), fields(user_id = %user_id, key_id = %key_id))]
    pub async fn remove(&self, user_id: &UserId, key_id: &Id) -> Result<bool, AuthError> {
        let Some(record) = self.store.delete(key_id, user_id).await? else {
            return Ok(false);
        };
        self.cache.invalidate(&ssh_key_key(&record.fingerprint)).await;
        let event = InvalidationEvent::ssh_key_removed(
            &record.fingerprint,
            record.user_id.as_str(),
            record.id.as_str(),
        );
        if let Err(err) = self.bus.publish(&event).await {
            warn!(%err, key_id = %record.id, "failed to publish key invalidation");
        }
        Ok(true)
    }

    /// Resolves a fingerprint to its owning user id, consulting the
    /// lookaside cache.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] for a structurally invalid
    /// fingerprint; an unknown but well-formed fingerprint is `Ok(None)`.
    pub async fn lookup_owner(&self, fingerprint: &str) -> Result<Option<UserId>, AuthError> {
        if !is_valid_fingerprint(fingerprint) {
            return Err(AuthError::validation("malformed fingerprint"));
        }

        let cache_key = ssh_key_key(fingerprint);
        match self.cache.get(&cache_key).await {
            Some(CachedLookup::KeyOwner(owner)) => {
                // Cached owner ids were validated on the way in.
                return Ok(Id::parse(&owner).ok());
            }
            Some(CachedLookup::Negative) => return Ok(None),
            Some(other) => {
                warn!(key = %cache_key, ?other, "unexpected cached value shape");
            }
            None => {}
        }

        let record = self.store.find_by_fingerprint(fingerprint).await?;
        let (value, ttl) = match &record {
            Some(record) => (
                CachedLookup::KeyOwner(record.user_id.as_str().to_string()),
                self.cache_config.positive_ttl,
            ),
            None => (CachedLookup::Negative, self.cache_config.negative_ttl),
        };
        self.cache.set(&cache_key, value, ttl).await;

        Ok(record.map(|record| record.user_id))
    }
}
