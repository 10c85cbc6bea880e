//! Record types and store identifiers.
//!
//! Identifiers are 24-character lowercase-hex strings, the shape the
//! surrounding document store assigns. [`Id::parse`] is fallible on purpose:
//! malformed ids arrive from HTTP path parameters, and callers decide
//! whether to reject them or degrade gracefully (e.g., list-by-user with a
//! malformed id returns an empty list rather than a store error).

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Byte length of the random portion of a generated [`Id`].
const ID_BYTES: usize = 12;

/// Length of an [`Id`] in hex characters.
pub const ID_LEN: usize = ID_BYTES * 2;

/// A store-assigned identifier: 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

/// Alias used where an identifier refers to a user account.
pub type UserId = Id;

impl Id {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parses a raw string into an [`Id`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] if the input is not exactly 24
    /// lowercase hex characters.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if Self::is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(StoreError::invalid_id(raw))
        }
    }

    /// Returns `true` if `raw` is structurally a valid identifier.
    pub fn is_valid(raw: &str) -> bool {
        raw.len() == ID_LEN
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored personal access token.
///
/// The `hash` field holds an algorithm-specific digest of the secret; the
/// plaintext itself is never persisted and is not reconstructible from the
/// digest. `hash_prefix` is a short, non-secret index derived from a fast
/// digest of the *plaintext* (never the `hash`) — it bounds the candidate
/// set during introspection and never changes after creation. Multiple
/// tokens may share a prefix; the collision space is deliberately small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    /// Store-assigned identity.
    pub id: Id,
    /// Owning user.
    pub user_id: UserId,
    /// Human label; not unique.
    pub label: String,
    /// Algorithm-specific digest of the secret.
    pub hash: String,
    /// 8 lowercase-hex characters of `sha256(plaintext)`.
    pub hash_prefix: String,
    /// Tag of the algorithm that produced `hash`.
    pub algorithm: String,
    /// Opaque scope strings, order-preserving.
    pub scopes: Vec<String>,
    /// Whether the token is usable. Flipped to `false` on revoke;
    /// records are never hard-deleted by this subsystem.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Optional expiry, evaluated lazily at introspection time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful introspection match, best-effort.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Insert shape for a new access token. Identity and timestamps are
/// store-assigned; new tokens are always active.
#[derive(Debug, Clone)]
pub struct NewAccessToken {
    /// Owning user.
    pub user_id: UserId,
    /// Human label.
    pub label: String,
    /// Algorithm-specific digest of the secret.
    pub hash: String,
    /// 8 lowercase-hex characters of `sha256(plaintext)`.
    pub hash_prefix: String,
    /// Tag of the algorithm that produced `hash`.
    pub algorithm: String,
    /// Opaque scope strings.
    pub scopes: Vec<String>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A stored SSH public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyRecord {
    /// Store-assigned identity.
    pub id: Id,
    /// Owning user.
    pub user_id: UserId,
    /// Optional human label.
    pub key_name: String,
    /// OpenSSH wire text as submitted.
    pub public_key: String,
    /// Canonical `SHA256:<44-char base64>` digest of the key-data field.
    /// Unique-indexed by the store.
    pub fingerprint: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a new SSH key.
#[derive(Debug, Clone)]
pub struct NewSshKey {
    /// Owning user.
    pub user_id: UserId,
    /// Optional human label.
    pub key_name: String,
    /// OpenSSH wire text.
    pub public_key: String,
    /// Canonical fingerprint; computed by the key registry.
    pub fingerprint: String,
}
