//! Personal access token lifecycle.
//!
//! [`TokenManager`] orchestrates the hash suite, the lookaside cache, the
//! invalidation bus, and the durable store into the four token operations:
//! create, list, revoke, and introspect.
//!
//! # Secret Handling
//!
//! The plaintext secret is 32 random bytes, hex-encoded, returned exactly
//! once from [`TokenManager::create`] and never persisted or retrievable
//! again. What is persisted: the password-grade digest of the secret and an
//! 8-hex-char `hash_prefix` derived from a fast SHA-256 of the *plaintext*.
//! The prefix is the only lookup index by secret — introspection fetches
//! the bounded candidate set sharing the prefix and verifies against each
//! candidate's stored digest.
//!
//! # Revocation Visibility
//!
//! Revocation flips the record, evicts the local cache entry synchronously
//! (same-instance introspection sees the revoke immediately), then
//! publishes a best-effort invalidation event so peers evict theirs.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use credhub_store::{AccessTokenRecord, Id, NewAccessToken, TokenStore, UserId};

use crate::{
    bus::{InvalidationBus, InvalidationEvent},
    cache::{CacheConfig, CachedLookup, LookupCache, introspect_key},
    error::AuthError,
    hash::HashSuite,
    metrics::AuthMetrics,
};

/// Bytes of entropy in a generated secret. Hex-encoded, so the plaintext
/// is twice this many characters.
const SECRET_BYTES: usize = 32;

/// Hex characters of `sha256(plaintext)` used as the lookup prefix.
pub const HASH_PREFIX_LEN: usize = 8;

/// Derives the lookup prefix from a plaintext secret.
///
/// Fast and non-secret on purpose: the prefix is an index, not a
/// credential, and must be recomputable on every introspection.
pub fn hash_prefix(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)[..HASH_PREFIX_LEN].to_string()
}

/// Parameters for token creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToken {
    /// Human label; not unique.
    #[serde(default)]
    pub label: Option<String>,
    /// Opaque scope strings, order-preserving.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Optional expiry, evaluated lazily at introspection time.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// When set with a label, retire existing active tokens carrying the
    /// same label before issuing the new one.
    #[serde(default)]
    pub replace: bool,
}

/// The one-time result of token creation.
///
/// `token` is the only copy of the plaintext that will ever exist outside
/// the caller's hands.
#[derive(Debug, Clone)]
pub struct CreatedToken {
    /// Store-assigned identity.
    pub id: Id,
    /// The plaintext secret. Shown once, never retrievable again.
    pub token: String,
    /// The non-secret prefix, suitable for UI display as a partial.
    pub hash_prefix: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry carried over from the request.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of introspecting a plaintext secret.
///
/// An inactive result carries no identifying fields, so a caller probing
/// with garbage learns nothing beyond "not a live token".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Introspection {
    /// Whether the secret matched a live, unexpired token.
    pub active: bool,
    /// Owning user, when active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Granted scopes, when active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// Expiry, when active and set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// The matched token's prefix, when active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_prefix: Option<String>,
}

impl Introspection {
    /// The anonymous negative result.
    pub fn inactive() -> Self {
        Self { active: false, user_id: None, scopes: None, expires_at: None, hash_prefix: None }
    }

    fn from_record(record: &AccessTokenRecord) -> Self {
        Self {
            active: true,
            user_id: Some(record.user_id.clone()),
            scopes: Some(record.scopes.clone()),
            expires_at: record.expires_at,
            hash_prefix: Some(record.hash_prefix.clone()),
        }
    }
}

/// Token lifecycle manager.
///
/// All collaborators are injected at construction; cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    suite: HashSuite,
    cache: Arc<dyn LookupCache>,
    bus: Arc<dyn InvalidationBus>,
    cache_config: CacheConfig,
    metrics: Arc<AuthMetrics>,
}

impl TokenManager {
    /// Wires a manager from its collaborators.
    pub fn new(
        store: Arc<dyn TokenStore>,
        suite: HashSuite,
        cache: Arc<dyn LookupCache>,
        bus: Arc<dyn InvalidationBus>,
        cache_config: CacheConfig,
        metrics: Arc<AuthMetrics>,
    ) -> Self {
        Self { store, suite, cache, bus, cache_config, metrics }
    }

    /// Issues a new token for `user_id`.
    ///
    /// With `replace` set and a label given, every existing active token
    /// carrying the same label is retired first, with one invalidation
    /// event published per retired token.
    ///
    /// # Errors
    ///
    /// Propagates hash-suite configuration failures and store errors.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create(
        &self,
        user_id: &UserId,
        request: CreateToken,
    ) -> Result<CreatedToken, AuthError> {
        let plaintext = generate_secret();
        let prefix = hash_prefix(&plaintext);
        let hashed = self.suite.hash(&plaintext).await?;

        let label = request.label.unwrap_or_default();
        if request.replace && !label.is_empty() {
            let retired = self.store.deactivate_by_label(user_id, &label).await?;
            for old in &retired {
                self.invalidate_token(old).await;
                self.metrics.record_token_revoked();
            }
            if !retired.is_empty() {
                debug!(count = retired.len(), label, "retired predecessor tokens");
            }
        }

        let record = self
            .store
            .insert(NewAccessToken {
                user_id: user_id.clone(),
                label,
                hash: hashed.digest,
                hash_prefix: prefix.clone(),
                algorithm: hashed.algorithm.as_str().to_string(),
                scopes: request.scopes,
                expires_at: request.expires_at,
            })
            .await?;
        self.metrics.record_token_created();

        Ok(CreatedToken {
            id: record.id,
            token: plaintext,
            hash_prefix: prefix,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }

    /// Lists all tokens for `user_id`, newest first, plaintext never
    /// included.
    ///
    /// A structurally invalid id degrades to an empty list rather than a
    /// store error: the id came from an HTTP path and "no such user" and
    /// "garbage id" deserve the same empty answer.
    pub async fn list(&self, user_id: &str) -> Result<Vec<AccessTokenRecord>, AuthError> {
        let Ok(user_id) = Id::parse(user_id) else {
            debug!(user_id, "malformed user id; returning empty token list");
            return Ok(Vec::new());
        };
        Ok(self.store.find_by_user(&user_id).await?)
    }

    /// Revokes the token matching `(token_id, user_id)`.
    ///
    /// Returns `false` when no matching active token exists — not an
    /// error. On success the local cache entry is evicted before this
    /// method returns, and a best-effort invalidation event is published.
    #[instrument(skip(self), fields(user_id = %user_id, token_id = %token_id))]
    pub async fn revoke(&self, user_id: &UserId, token_id: &Id) -> Result<bool, AuthError> {
        let Some(record) = self.store.deactivate(token_id, user_id).await? else {
            return Ok(false);
        };
        self.metrics.record_token_revoked();
        self.invalidate_token(&record).await;
        Ok(true)
    }

    /// Resolves a plaintext secret to its token, if one is live.
    ///
    /// Never fails on malformed input: anything that matches no candidate
    /// resolves to an inactive result. Expiry is evaluated here, lazily —
    /// an expired record stays in the store but introspects inactive.
    #[instrument(skip_all)]
    pub async fn introspect(&self, plaintext: &str) -> Result<Introspection, AuthError> {
        let prefix = hash_prefix(plaintext);
        let cache_key = introspect_key(&prefix);

        match self.cache.get(&cache_key).await {
            Some(CachedLookup::Introspection(cached)) => {
                self.metrics.record_cache_read(true);
                self.metrics.record_introspection(cached.active);
                return Ok(cached);
            }
            Some(CachedLookup::Negative) => {
                self.metrics.record_cache_read(true);
                self.metrics.record_introspection(false);
                return Ok(Introspection::inactive());
            }
            Some(other) => {
                // Namespacing should make this impossible; treat as a miss.
                warn!(key = %cache_key, ?other, "unexpected cached value shape");
                self.metrics.record_cache_read(false);
            }
            None => self.metrics.record_cache_read(false),
        }

        let candidates = self.store.find_active_by_prefix(&prefix).await?;
        let mut matched = None;
        for candidate in &candidates {
            if self.suite.verify(plaintext, &candidate.hash).await {
                matched = Some(candidate);
                break;
            }
        }

        let result = match matched {
            Some(record) if is_expired(record, Utc::now()) => {
                debug!(token_id = %record.id, "token matched but expired");
                Introspection::inactive()
            }
            Some(record) => {
                // Usage tracking is best-effort; a store hiccup here must
                // not fail an otherwise valid introspection.
                if let Err(err) = self.store.touch_last_used(&record.id).await {
                    debug!(token_id = %record.id, %err, "failed to bump last_used_at");
                }
                Introspection::from_record(record)
            }
            None => Introspection::inactive(),
        };

        let (value, ttl) = if result.active {
            (CachedLookup::Introspection(result.clone()), self.cache_config.positive_ttl)
        } else {
            (CachedLookup::Negative, self.cache_config.negative_ttl)
        };
        self.cache.set(&cache_key, value, ttl).await;

        self.metrics.record_introspection(result.active);
        Ok(result)
    }

    /// Synchronous local eviction, then best-effort publish to peers.
    async fn invalidate_token(&self, record: &AccessTokenRecord) {
        self.cache.invalidate(&introspect_key(&record.hash_prefix)).await;
        let event = InvalidationEvent::token_revoked(
            &record.hash_prefix,
            record.user_id.as_str(),
            record.id.as_str(),
        );
        if let Err(err) = self.bus.publish(&event).await {
            // The store update already stands; peers converge via TTL.
            warn!(%err, token_id = %record.id, "failed to publish token invalidation");
        }
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_expired(record: &AccessTokenRecord, now: DateTime<Utc>) -> bool {
    record.expires_at.is_some_and(|expiry| expiry <= now)
}
