//! Credential subsystem metrics.
//!
//! Lock-free counters for the hot paths plus a mutex-guarded map for the
//! low-cardinality per-limiter denial counts.
//!
//! # Memory Ordering
//!
//! All atomics use `Ordering::Relaxed`. Each counter is independent and
//! monotonically increasing; `Relaxed` guarantees atomicity of individual
//! increments, which is all telemetry needs. [`AuthMetrics::snapshot`] reads
//! counters sequentially and may observe them slightly out of sync with one
//! another — acceptable for dashboards operating on time-aggregated data,
//! and far cheaper than a mutex on every request.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

/// Counters for the credential core. Cheap to share via `Arc`.
#[derive(Debug, Default)]
pub struct AuthMetrics {
    /// Tokens issued.
    tokens_created: AtomicU64,
    /// Tokens revoked (explicit revoke or rotate-and-retire).
    tokens_revoked: AtomicU64,
    /// Introspections that matched an active token.
    introspect_hits: AtomicU64,
    /// Introspections that resolved inactive.
    introspect_misses: AtomicU64,
    /// Lookaside cache hits (positive or negative entry).
    cache_hits: AtomicU64,
    /// Lookaside cache misses.
    cache_misses: AtomicU64,
    /// Secrets hashed with the last-resort KDF. A nonzero value means the
    /// process is running in a degraded environment and operators should
    /// notice.
    degraded_hashes: AtomicU64,
    /// Rate-limit denials keyed by `(limiter name, method)`.
    rate_limit_denials: Mutex<HashMap<(String, String), u64>>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Tokens issued.
    pub tokens_created: u64,
    /// Tokens revoked.
    pub tokens_revoked: u64,
    /// Introspections that matched an active token.
    pub introspect_hits: u64,
    /// Introspections that resolved inactive.
    pub introspect_misses: u64,
    /// Lookaside cache hits.
    pub cache_hits: u64,
    /// Lookaside cache misses.
    pub cache_misses: u64,
    /// Secrets hashed with the last-resort KDF.
    pub degraded_hashes: u64,
    /// Rate-limit denials keyed by `(limiter name, method)`.
    pub rate_limit_denials: HashMap<(String, String), u64>,
}

impl AuthMetrics {
    /// Creates a zeroed metrics set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issued token.
    pub fn record_token_created(&self) {
        self.tokens_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a revoked token.
    pub fn record_token_revoked(&self) {
        self.tokens_revoked.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an introspection outcome.
    pub fn record_introspection(&self, active: bool) {
        if active {
            self.introspect_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.introspect_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a lookaside cache read.
    pub fn record_cache_read(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a hash produced by the last-resort KDF.
    pub fn record_degraded_hash(&self) {
        self.degraded_hashes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rate-limit denial tagged by limiter name and method.
    pub fn record_rate_limit_denial(&self, limiter: &str, method: &str) {
        let mut denials = self.rate_limit_denials.lock();
        *denials.entry((limiter.to_string(), method.to_string())).or_insert(0) += 1;
    }

    /// Returns the denial count for a limiter/method pair.
    pub fn rate_limit_denials(&self, limiter: &str, method: &str) -> u64 {
        self.rate_limit_denials
            .lock()
            .get(&(limiter.to_string(), method.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Returns a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tokens_created: self.tokens_created.load(Ordering::Relaxed),
            tokens_revoked: self.tokens_revoked.load(Ordering::Relaxed),
            introspect_hits: self.introspect_hits.load(Ordering::Relaxed),
            introspect_misses: self.introspect_misses.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            degraded_hashes: self.degraded_hashes.load(Ordering::Relaxed),
            rate_limit_denials: self.rate_limit_denials.lock().clone(),
        }
    }
}
