//! Credential subsystem configuration.
//!
//! One [`AuthConfig`] value carries every knob, resolved once at process
//! start and threaded into the managers at construction time. Every field
//! defaults, so an empty config deserializes to the production posture:
//! argon2id with no fallback, 60s/5s cache TTLs, rate limiting enabled and
//! fail-closed, origin header untrusted.

use serde::{Deserialize, Serialize};

use crate::{
    cache::CacheConfig,
    hash::{Argon2Params, HashPolicy},
    origin::OriginConfig,
    rate_limit::{Quota, RateLimiterPolicy},
};

/// Default bcrypt work factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Hashing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HashConfig {
    /// Algorithm selection policy.
    pub policy: HashPolicy,
    /// argon2id cost parameters.
    pub argon2: Argon2Params,
    /// bcrypt work factor.
    pub bcrypt_cost: BcryptCost,
}

/// Newtype so the bcrypt cost gets a serde default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BcryptCost(pub u32);

impl Default for BcryptCost {
    fn default() -> Self {
        Self(DEFAULT_BCRYPT_COST)
    }
}

/// Per-limiter quotas plus the shared policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Kill switch and fail-open/closed, shared by every limiter.
    pub policy: RateLimiterPolicy,
    /// Quota for `POST /tokens/introspect`.
    pub token_introspect: Quota,
    /// Quota for `GET /ssh-keys/{fingerprint}`.
    pub ssh_fingerprint_lookup: Quota,
    /// Quota for token creation.
    pub token_create: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            policy: RateLimiterPolicy::default(),
            token_introspect: Quota::token_introspect(),
            ssh_fingerprint_lookup: Quota::ssh_fingerprint_lookup(),
            token_create: Quota::token_create(),
        }
    }
}

/// Top-level configuration for the credential subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret hashing.
    pub hash: HashConfig,
    /// Lookaside cache TTLs and capacity.
    pub cache: CacheConfig,
    /// Service-origin resolution.
    pub origin: OriginConfig,
    /// Rate limiting.
    pub rate_limit: RateLimitConfig,
}

impl AuthConfig {
    /// Replaces the cache section.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the hash policy.
    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash.policy = policy;
        self
    }

    /// Replaces the rate-limiter policy.
    pub fn with_rate_limiter_policy(mut self, policy: RateLimiterPolicy) -> Self {
        self.rate_limit.policy = policy;
        self
    }
}
