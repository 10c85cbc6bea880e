//! # CredHub Authentication Core
//!
//! Personal access tokens and SSH public keys for multi-instance
//! deployments.
//!
//! This crate provides:
//! - **Token lifecycle**: create, list, revoke, and introspect access tokens
//! - **Key registry**: OpenSSH key validation, fingerprints, owner lookup
//! - **Hash strategies**: argon2id preferred, bcrypt and PBKDF2 fallbacks
//! - **Lookaside cache + invalidation bus**: fast repeated lookups with
//!   cross-instance eviction on revoke
//! - **Distributed rate limiting**: fixed-window counters shared across
//!   instances, keyed by resolved service origin
//!
//! ## Consistency Model
//!
//! A revoke is immediately visible on the instance that performed it
//! (synchronous local cache eviction) and eventually visible everywhere
//! else (best-effort, at-least-once invalidation events, bounded by the
//! cache TTL).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use credhub_authn::{
//!     AuthConfig, AuthMetrics, HashSuite, NoopBus, NoopCache, TokenManager,
//!     token::CreateToken,
//! };
//! use credhub_store::{Id, MemoryTokenStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::default();
//! let metrics = Arc::new(AuthMetrics::new());
//! let suite = HashSuite::new(
//!     config.hash.policy.clone(),
//!     config.hash.argon2,
//!     config.hash.bcrypt_cost.0,
//!     Arc::clone(&metrics),
//! );
//! let manager = TokenManager::new(
//!     Arc::new(MemoryTokenStore::new()),
//!     suite,
//!     Arc::new(NoopCache),
//!     Arc::new(NoopBus),
//!     config.cache,
//!     metrics,
//! );
//!
//! let user = Id::generate();
//! let created = manager.create(&user, CreateToken::default()).await?;
//! println!("token (shown once): {}", created.token);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cross-instance cache invalidation.
pub mod bus;
/// Lookaside cache for secret-derived lookups.
pub mod cache;
/// Configuration for the whole subsystem.
pub mod config;
/// Error types.
pub mod error;
/// Secret hashing strategies.
pub mod hash;
/// Subsystem metrics.
pub mod metrics;
/// Service-origin resolution.
pub mod origin;
/// Distributed rate limiting.
pub mod rate_limit;
/// Redis-backed counter store and bus.
#[cfg(feature = "redis")]
pub mod redis;
/// SSH public key registry.
pub mod ssh_key;
/// Access token lifecycle.
pub mod token;

// Re-export key types for convenience
pub use bus::{
    INVALIDATION_CHANNEL, InvalidationBus, InvalidationEvent, LocalBus, NoopBus, ResourceKind,
    spawn_invalidation_listener,
};
pub use cache::{CacheConfig, CachedLookup, LookupCache, MemoryLookupCache, NoopCache};
pub use config::AuthConfig;
pub use error::AuthError;
pub use hash::{Algorithm, HashPolicy, HashStrategy, HashSuite};
pub use metrics::{AuthMetrics, MetricsSnapshot};
pub use origin::{OriginConfig, RequestMeta, origin_rate_key, service_origin};
pub use rate_limit::{
    CounterStore, MemoryCounterStore, Method, Quota, RateLimitInfo, RateLimiter, RateLimiterPolicy,
};
pub use ssh_key::{KeyCreation, KeyRegistry};
pub use token::{Introspection, TokenManager};
