//! Distributed fixed-window rate limiting.
//!
//! Every lookup/introspection endpoint consumes points from a fixed-window
//! counter keyed by `(limiter name, caller key)`. Counters live in a shared
//! external store so independently-scaled instances enforce one budget; the
//! [`CounterStore`] trait seams that out, with an in-memory implementation
//! for tests and a Redis implementation in [`crate::redis`].
//!
//! # Policy
//!
//! [`RateLimiterPolicy`] is a single injected value object resolved once at
//! process start — there are no scattered runtime environment checks.
//! `enabled = false` is the operator kill switch: every consume succeeds
//! with a synthetic plenty-left result. `fail_open` decides what happens
//! when the backing store is unreachable; the default is fail-closed
//! (propagate the failure).
//!
//! # Subnet Limiter
//!
//! An optional coarser limiter aggregates IPv4 callers by /24 to blunt
//! single-source-many-IP abuse. It only participates when the consume
//! method is [`Method::Ip`] and carries its own point budget.
//!
//! # Observability
//!
//! Every denial bumps a counter tagged by limiter name and method. Only the
//! *first* denial after crossing the threshold is logged, so an abusive
//! caller cannot turn the limiter into a log storm.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::AuthError,
    metrics::AuthMetrics,
    origin::subnet_key,
};

/// How the caller key was derived; tags metrics and gates the subnet
/// limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Key is a resolved service origin.
    ServiceOrigin,
    /// Key is a raw IP address.
    Ip,
    /// Key derivation unknown.
    Unknown,
}

impl Method {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceOrigin => "service-origin",
            Self::Ip => "ip",
            Self::Unknown => "unknown",
        }
    }
}

/// Window state returned by a consume, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Points left in the current window (zero when denied).
    pub remaining_points: u64,
    /// Milliseconds until the window resets.
    pub ms_before_next: u64,
    /// Points consumed so far in this window.
    pub consumed_points: u64,
}

impl RateLimitInfo {
    /// The synthetic result returned when the kill switch is engaged or a
    /// store failure is waved through under a fail-open policy.
    pub fn unlimited() -> Self {
        Self { remaining_points: 100, ms_before_next: 0, consumed_points: 0 }
    }
}

/// Point budget and window shape for one limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quota {
    /// Points that may be consumed per window.
    pub points: u64,
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Extra penalty window applied once the budget is exhausted.
    #[serde(with = "humantime_serde", default)]
    pub block_duration: Duration,
    /// Budget for the /24 aggregate limiter; `None` disables it.
    #[serde(default)]
    pub subnet_points: Option<u64>,
}

impl Quota {
    /// 60 requests per minute, the default for introspection endpoints.
    pub fn token_introspect() -> Self {
        Self {
            points: 60,
            duration: Duration::from_secs(60),
            block_duration: Duration::ZERO,
            subnet_points: None,
        }
    }

    /// 60 requests per minute for SSH fingerprint lookup.
    pub fn ssh_fingerprint_lookup() -> Self {
        Self::token_introspect()
    }

    /// 10 requests per minute for token creation.
    pub fn token_create() -> Self {
        Self {
            points: 10,
            duration: Duration::from_secs(60),
            block_duration: Duration::ZERO,
            subnet_points: None,
        }
    }
}

/// Operator policy applied to every limiter instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterPolicy {
    /// Kill switch: when `false`, every consume succeeds synthetically.
    pub enabled: bool,
    /// When the counter store fails: `true` waves the request through,
    /// `false` propagates [`AuthError::CounterUnavailable`].
    pub fail_open: bool,
}

impl Default for RateLimiterPolicy {
    fn default() -> Self {
        Self { enabled: true, fail_open: false }
    }
}

/// State of one `(limiter, key)` window after an increment.
#[derive(Debug, Clone, Copy)]
pub struct WindowState {
    /// Total points consumed in the window, including this increment.
    pub consumed: u64,
    /// Time until the window expires.
    pub retry_after: Duration,
}

/// Shared counter store seam.
///
/// Implementations must keep individual operations on a short, bounded
/// timeout distinct from the request timeout, so a degraded store fails
/// this operation instead of hanging the request.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds `points` to the window counter for `key`, starting the window
    /// (of length `window`) if absent.
    async fn increment(&self, key: &str, points: u64, window: Duration)
    -> Result<WindowState, AuthError>;

    /// Extends the expiry of `key` by `extra` (penalty on exhaustion).
    async fn penalize(&self, key: &str, extra: Duration) -> Result<(), AuthError>;

    /// Clears the window counter for `key`.
    async fn reset(&self, key: &str) -> Result<(), AuthError>;
}

/// In-memory counter store for tests and single-instance runs.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    windows: Arc<Mutex<HashMap<String, (u64, Instant)>>>,
}

impl MemoryCounterStore {
    /// Creates an empty counter store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        points: u64,
        window: Duration,
    ) -> Result<WindowState, AuthError> {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let entry = windows.entry(key.to_string()).or_insert((0, now + window));
        if entry.1 <= now {
            // Window elapsed; start a fresh one.
            *entry = (0, now + window);
        }
        entry.0 += points;
        Ok(WindowState {
            consumed: entry.0,
            retry_after: entry.1.saturating_duration_since(now),
        })
    }

    async fn penalize(&self, key: &str, extra: Duration) -> Result<(), AuthError> {
        if let Some(entry) = self.windows.lock().get_mut(key) {
            entry.1 += extra;
        }
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), AuthError> {
        self.windows.lock().remove(key);
        Ok(())
    }
}

/// A counter store that always fails, for policy tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCounterStore;

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn increment(
        &self,
        _key: &str,
        _points: u64,
        _window: Duration,
    ) -> Result<WindowState, AuthError> {
        Err(AuthError::counter_unavailable("counter store offline"))
    }

    async fn penalize(&self, _key: &str, _extra: Duration) -> Result<(), AuthError> {
        Err(AuthError::counter_unavailable("counter store offline"))
    }

    async fn reset(&self, _key: &str) -> Result<(), AuthError> {
        Err(AuthError::counter_unavailable("counter store offline"))
    }
}

/// A named fixed-window rate limiter.
pub struct RateLimiter {
    name: String,
    quota: Quota,
    policy: RateLimiterPolicy,
    store: Arc<dyn CounterStore>,
    metrics: Arc<AuthMetrics>,
}

impl RateLimiter {
    /// Creates a limiter. Different limiters must use different names —
    /// the name partitions the counter keyspace.
    pub fn new(
        name: impl Into<String>,
        quota: Quota,
        policy: RateLimiterPolicy,
        store: Arc<dyn CounterStore>,
        metrics: Arc<AuthMetrics>,
    ) -> Self {
        Self { name: name.into(), quota, policy, store, metrics }
    }

    /// The limiter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-only access to the quota, useful for aligning limits.
    pub fn quota(&self) -> Quota {
        self.quota
    }

    fn counter_key(&self, key: &str) -> String {
        format!("rate-limit:{}:{key}", self.name)
    }

    /// Consumes `points` from the window for `key`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`] once the budget is exhausted, carrying the window state
    /// - [`AuthError::CounterUnavailable`] when the store fails and policy is fail-closed
    pub async fn consume(
        &self,
        key: &str,
        points: u64,
        method: Method,
    ) -> Result<RateLimitInfo, AuthError> {
        if !self.policy.enabled {
            debug!(limiter = %self.name, key, "rate limiter disabled; returning synthetic result");
            return Ok(RateLimitInfo::unlimited());
        }

        let info = self
            .consume_window(&self.counter_key(key), self.quota.points, points, method, "")
            .await?;

        // The coarser aggregate only makes sense for IP-derived keys.
        if method == Method::Ip {
            if let Some(subnet_points) = self.quota.subnet_points {
                if let Some(subnet) = subnet_key(key) {
                    self.consume_window(
                        &self.counter_key(&subnet),
                        subnet_points,
                        points,
                        method,
                        "ip-subnet",
                    )
                    .await?;
                }
            }
        }

        Ok(info)
    }

    async fn consume_window(
        &self,
        counter_key: &str,
        budget: u64,
        points: u64,
        method: Method,
        variant: &str,
    ) -> Result<RateLimitInfo, AuthError> {
        let state = match self
            .store
            .increment(counter_key, points, self.quota.duration)
            .await
        {
            Ok(state) => state,
            Err(err) if self.policy.fail_open => {
                warn!(limiter = %self.name, %err, "counter store failed; failing open");
                return Ok(RateLimitInfo::unlimited());
            }
            Err(err) => return Err(err),
        };

        let retry_ms = state.retry_after.as_millis() as u64;
        if state.consumed > budget {
            // Log only the crossing, not every subsequent denial.
            if state.consumed - points <= budget {
                warn!(limiter = %self.name, key = counter_key, variant, "rate limit exceeded");
                if !self.quota.block_duration.is_zero() {
                    // Penalty extension is best-effort.
                    if let Err(err) =
                        self.store.penalize(counter_key, self.quota.block_duration).await
                    {
                        debug!(limiter = %self.name, %err, "failed to apply block duration");
                    }
                }
            }
            self.metrics.record_rate_limit_denial(&self.name, method.as_str());
            return Err(AuthError::RateLimited {
                info: RateLimitInfo {
                    remaining_points: 0,
                    ms_before_next: retry_ms,
                    consumed_points: state.consumed,
                },
            });
        }

        Ok(RateLimitInfo {
            remaining_points: budget - state.consumed,
            ms_before_next: retry_ms,
            consumed_points: state.consumed,
        })
    }

    /// Clears the window for `key` on the primary limiter.
    pub async fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.store.reset(&self.counter_key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(quota: Quota, policy: RateLimiterPolicy) -> RateLimiter {
        RateLimiter::new(
            "test",
            quota,
            policy,
            Arc::new(MemoryCounterStore::new()),
            Arc::new(AuthMetrics::new()),
        )
    }

    #[tokio::test]
    async fn budget_exhaustion_denies_the_next_request() {
        let quota = Quota { points: 3, duration: Duration::from_secs(60), ..Quota::token_create() };
        let limiter = limiter(quota, RateLimiterPolicy::default());

        for expected_remaining in [2, 1, 0] {
            let info = limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap();
            assert_eq!(info.remaining_points, expected_remaining);
        }

        let err = limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap_err();
        match err {
            AuthError::RateLimited { info } => {
                assert_eq!(info.remaining_points, 0);
                assert!(info.ms_before_next > 0);
                assert_eq!(info.consumed_points, 4);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keys_have_independent_budgets() {
        let quota = Quota { points: 1, duration: Duration::from_secs(60), ..Quota::token_create() };
        let limiter = limiter(quota, RateLimiterPolicy::default());

        limiter.consume("a", 1, Method::ServiceOrigin).await.unwrap();
        assert!(limiter.consume("a", 1, Method::ServiceOrigin).await.is_err());
        limiter.consume("b", 1, Method::ServiceOrigin).await.unwrap();
    }

    #[tokio::test]
    async fn kill_switch_never_rejects() {
        let quota = Quota { points: 1, duration: Duration::from_secs(60), ..Quota::token_create() };
        let limiter = limiter(quota, RateLimiterPolicy { enabled: false, fail_open: false });

        for _ in 0..20 {
            let info = limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap();
            assert_eq!(info, RateLimitInfo::unlimited());
        }
    }

    #[tokio::test]
    async fn store_failure_honors_fail_policy() {
        let quota = Quota::token_introspect();
        let metrics = Arc::new(AuthMetrics::new());

        let closed = RateLimiter::new(
            "closed",
            quota,
            RateLimiterPolicy { enabled: true, fail_open: false },
            Arc::new(FailingCounterStore),
            Arc::clone(&metrics),
        );
        let err = closed.consume("caller", 1, Method::ServiceOrigin).await.unwrap_err();
        assert!(matches!(err, AuthError::CounterUnavailable { .. }), "got {err:?}");

        let open = RateLimiter::new(
            "open",
            quota,
            RateLimiterPolicy { enabled: true, fail_open: true },
            Arc::new(FailingCounterStore),
            metrics,
        );
        let info = open.consume("caller", 1, Method::ServiceOrigin).await.unwrap();
        assert_eq!(info, RateLimitInfo::unlimited());
    }

    #[tokio::test]
    async fn subnet_budget_spans_sibling_addresses() {
        let quota = Quota {
            points: 100,
            duration: Duration::from_secs(60),
            block_duration: Duration::ZERO,
            subnet_points: Some(3),
        };
        let limiter = limiter(quota, RateLimiterPolicy::default());

        // Distinct addresses in one /24 share the aggregate budget.
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            limiter.consume(ip, 1, Method::Ip).await.unwrap();
        }
        let err = limiter.consume("10.0.0.4", 1, Method::Ip).await.unwrap_err();
        assert!(err.is_rate_limited());

        // A different /24 is unaffected.
        limiter.consume("10.0.1.1", 1, Method::Ip).await.unwrap();
    }

    #[tokio::test]
    async fn subnet_limiter_ignores_non_ip_methods() {
        let quota = Quota {
            points: 100,
            duration: Duration::from_secs(60),
            block_duration: Duration::ZERO,
            subnet_points: Some(1),
        };
        let limiter = limiter(quota, RateLimiterPolicy::default());

        // Same keys, but service-origin method: the subnet aggregate must
        // not participate.
        for _ in 0..5 {
            limiter.consume("10.0.0.1", 1, Method::ServiceOrigin).await.unwrap();
        }
    }

    #[tokio::test]
    async fn denials_are_counted_per_limiter_and_method() {
        let quota = Quota { points: 1, duration: Duration::from_secs(60), ..Quota::token_create() };
        let metrics = Arc::new(AuthMetrics::new());
        let limiter = RateLimiter::new(
            "token-introspect",
            quota,
            RateLimiterPolicy::default(),
            Arc::new(MemoryCounterStore::new()),
            Arc::clone(&metrics),
        );

        limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap();
        let _ = limiter.consume("caller", 1, Method::ServiceOrigin).await;
        let _ = limiter.consume("caller", 1, Method::ServiceOrigin).await;

        assert_eq!(metrics.rate_limit_denials("token-introspect", "service-origin"), 2);
    }

    #[tokio::test]
    async fn exhaustion_extends_the_window_by_the_block_duration() {
        let quota = Quota {
            points: 1,
            duration: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
            subnet_points: None,
        };
        let limiter = limiter(quota, RateLimiterPolicy::default());

        limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap();

        // The crossing denial reports the base window and applies the
        // penalty; later denials see the extended expiry.
        let err = limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap_err();
        match err {
            AuthError::RateLimited { info } => assert!(info.ms_before_next <= 60_000),
            other => panic!("expected RateLimited, got {other:?}"),
        }

        let err = limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap_err();
        match err {
            AuthError::RateLimited { info } => {
                assert!(
                    info.ms_before_next > 60_000,
                    "retry window not extended: {}ms",
                    info.ms_before_next
                );
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn window_resets_after_duration() {
        let quota = Quota {
            points: 1,
            duration: Duration::from_millis(40),
            block_duration: Duration::ZERO,
            subnet_points: None,
        };
        let limiter = limiter(quota, RateLimiterPolicy::default());

        limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap();
        assert!(limiter.consume("caller", 1, Method::ServiceOrigin).await.is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.consume("caller", 1, Method::ServiceOrigin).await.unwrap();
    }
}
