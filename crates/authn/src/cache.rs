//! Lookaside cache for secret-derived lookups.
//!
//! The cache sits in front of the durable store on the two hot read paths:
//! token introspection (keyed by hash prefix) and SSH fingerprint lookup.
//! Both positive results and explicit negative markers are cached — a
//! negative entry prevents repeated store misses for garbage input, but
//! expires fast so it never masks a just-created resource.
//!
//! # Contract
//!
//! - `get` returning `None` means *cache miss*: the caller must re-derive
//!   from the store. A cached negative is `Some(CachedLookup::Negative)`.
//! - Entries are a derived, time-bounded copy; the durable store stays the
//!   system of record and the cache is never treated as authoritative.
//! - `invalidate` is local-only eviction and must be idempotent, because
//!   the invalidation bus delivers at-least-once.
//!
//! # TTLs
//!
//! Per-entry TTLs ride inside the stored entry and are enforced by a
//! [`moka::Expiry`] policy, so one cache carries both the long positive TTL
//! and the short negative TTL.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::token::Introspection;

/// Default TTL for positive lookup results.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(60);

/// Default TTL for negative markers.
///
/// Short on purpose: a stale negative would hide a resource created after
/// the miss was cached.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(5);

/// Default maximum number of cache entries.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Cache TTL configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for positive results.
    #[serde(with = "humantime_serde")]
    pub positive_ttl: Duration,
    /// TTL for explicit negative markers.
    #[serde(with = "humantime_serde")]
    pub negative_ttl: Duration,
    /// Capacity bound; least-recently-used entries are evicted beyond it.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            positive_ttl: DEFAULT_POSITIVE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// A cached lookup result.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedLookup {
    /// Token introspection result (active or inactive).
    Introspection(Introspection),
    /// SSH fingerprint resolved to this user id.
    KeyOwner(String),
    /// Explicit negative: the store was consulted and had nothing.
    Negative,
}

/// Cache seam consumed by the lifecycle managers.
///
/// Injected at construction time; [`NoopCache`] satisfies environments and
/// tests that run without a cache backend.
#[async_trait]
pub trait LookupCache: Send + Sync {
    /// Returns the cached value for `key`, or `None` on miss.
    async fn get(&self, key: &str) -> Option<CachedLookup>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: CachedLookup, ttl: Duration);

    /// Evicts `key` locally. Idempotent; evicting an absent key is a no-op.
    async fn invalidate(&self, key: &str);
}

/// An entry carrying its own TTL for the per-entry expiry policy.
#[derive(Clone)]
struct Entry {
    value: CachedLookup,
    ttl: Duration,
}

/// Per-entry expiry policy reading the TTL stored in the entry itself.
struct EntryExpiry;

impl moka::Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process lookaside cache backed by [`moka::future::Cache`].
///
/// # Thread Safety
///
/// Cheap to clone; all clones share the same underlying cache and it is
/// safe for concurrent use from multiple async tasks.
#[derive(Clone)]
pub struct MemoryLookupCache {
    entries: Cache<String, Entry>,
}

impl MemoryLookupCache {
    /// Creates a cache with the given capacity bound.
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }

    /// Number of entries currently resident (approximate).
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

impl Default for MemoryLookupCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl LookupCache for MemoryLookupCache {
    async fn get(&self, key: &str) -> Option<CachedLookup> {
        self.entries.get(key).await.map(|entry| entry.value)
    }

    async fn set(&self, key: &str, value: CachedLookup, ttl: Duration) {
        self.entries.insert(key.to_string(), Entry { value, ttl }).await;
    }

    async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }
}

/// Cache implementation that caches nothing.
///
/// Every `get` is a miss, so callers always fall through to the durable
/// store. Selected at wiring time for environments without a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl LookupCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<CachedLookup> {
        None
    }

    async fn set(&self, _key: &str, _value: CachedLookup, _ttl: Duration) {}

    async fn invalidate(&self, _key: &str) {}
}

/// Builds the namespaced cache key for a token hash prefix.
pub fn introspect_key(hash_prefix: &str) -> String {
    format!("introspect:{hash_prefix}")
}

/// Builds the namespaced cache key for an SSH key fingerprint.
pub fn ssh_key_key(fingerprint: &str) -> String {
    format!("sshkey:{fingerprint}")
}
