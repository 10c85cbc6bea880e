//! Redis-backed counter store and invalidation bus.
//!
//! Both sides of the distributed story live here: the fixed-window
//! counters every instance shares, and the pub/sub transport for
//! [`InvalidationEvent`]s. Enabled by the `redis` feature.
//!
//! Every command runs under a short, bounded timeout distinct from the
//! request timeout. A degraded Redis fails the *specific* operation —
//! the rate-limiter policy then decides open or closed, and a failed
//! publish is logged and absorbed.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fred::{
    clients::{Pool, SubscriberClient},
    interfaces::{ClientLike, EventInterface, KeysInterface, PubsubInterface},
    types::config::{Config, ReconnectPolicy, ServerConfig},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bus::{INVALIDATION_CHANNEL, InvalidationBus, InvalidationEvent, apply_invalidation},
    cache::LookupCache,
    error::AuthError,
    rate_limit::{CounterStore, WindowState},
};

/// Default per-command timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// Connections held by the pool.
const POOL_SIZE: usize = 4;

/// Builds and connects a Redis pool for `endpoint` (`host[:port]`,
/// optionally with a `redis://` scheme prefix).
///
/// # Errors
///
/// Returns [`AuthError::CounterUnavailable`] when the pool cannot be
/// built or the initial connection fails.
pub async fn connect(endpoint: &str) -> Result<Pool, AuthError> {
    let endpoint = endpoint.trim_start_matches("redis://");
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>().map_err(|_| {
                AuthError::counter_unavailable(format!("invalid redis port in {endpoint:?}"))
            })?,
        ),
        None => (endpoint, 6379),
    };

    let config = Config {
        server: ServerConfig::new_centralized(host, port),
        ..Config::default()
    };
    let mut builder = fred::types::Builder::from_config(config);
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder
        .build_pool(POOL_SIZE)
        .map_err(|err| AuthError::counter_unavailable(format!("redis pool build: {err}")))?;
    pool.init()
        .await
        .map_err(|err| AuthError::counter_unavailable(format!("redis connect: {err}")))?;
    info!(host, port, "redis pool connected");
    Ok(pool)
}

async fn bounded<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, fred::error::Error>>,
) -> Result<T, AuthError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AuthError::counter_unavailable(format!("{what}: {err}"))),
        Err(_) => Err(AuthError::counter_unavailable(format!("{what}: timed out"))),
    }
}

/// Fixed-window counters in Redis.
///
/// Window lifetime rides on key expiry: the first increment of a window
/// also sets the key's TTL, and the remaining TTL reported by `PTTL` is
/// the retry-after.
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
    op_timeout: Duration,
}

impl RedisCounterStore {
    /// Wraps a connected pool with the default per-command timeout.
    pub fn new(pool: Pool) -> Self {
        Self { pool, op_timeout: DEFAULT_OP_TIMEOUT }
    }

    /// Overrides the per-command timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        points: u64,
        window: Duration,
    ) -> Result<WindowState, AuthError> {
        let consumed: i64 = bounded(
            self.op_timeout,
            "redis INCRBY",
            self.pool.incr_by(key, points as i64),
        )
        .await?;

        // First increment of a fresh window starts its expiry clock.
        if consumed == points as i64 {
            let _: i64 = bounded(
                self.op_timeout,
                "redis PEXPIRE",
                self.pool.pexpire(key, window.as_millis() as i64, None),
            )
            .await?;
        }

        let ttl_ms: i64 = bounded(self.op_timeout, "redis PTTL", self.pool.pttl(key)).await?;
        Ok(WindowState {
            consumed: consumed.max(0) as u64,
            retry_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn penalize(&self, key: &str, extra: Duration) -> Result<(), AuthError> {
        let ttl_ms: i64 = bounded(self.op_timeout, "redis PTTL", self.pool.pttl(key)).await?;
        let new_ttl = ttl_ms.max(0) + extra.as_millis() as i64;
        let _: i64 = bounded(
            self.op_timeout,
            "redis PEXPIRE",
            self.pool.pexpire(key, new_ttl, None),
        )
        .await?;
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), AuthError> {
        let _: i64 = bounded(self.op_timeout, "redis DEL", self.pool.del(key)).await?;
        Ok(())
    }
}

/// Invalidation bus over Redis pub/sub.
#[derive(Clone)]
pub struct RedisBus {
    pool: Pool,
    op_timeout: Duration,
}

impl RedisBus {
    /// Wraps a connected pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool, op_timeout: DEFAULT_OP_TIMEOUT }
    }
}

#[async_trait]
impl InvalidationBus for RedisBus {
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), AuthError> {
        let payload = serde_json::to_string(event)
            .map_err(|err| AuthError::bus(format!("encode invalidation event: {err}")))?;
        // Pool does not implement PubsubInterface in fred v10; publish
        // through one of its clients.
        match tokio::time::timeout(
            self.op_timeout,
            self.pool.next().publish::<i64, _, _>(INVALIDATION_CHANNEL, payload.as_str()),
        )
        .await
        {
            Ok(Ok(receivers)) => {
                debug!(receivers, "published invalidation event");
                Ok(())
            }
            Ok(Err(err)) => Err(AuthError::bus(format!("redis PUBLISH: {err}"))),
            Err(_) => Err(AuthError::bus("redis PUBLISH: timed out")),
        }
    }
}

/// Spawns a subscriber that applies invalidation events from Redis to the
/// local cache until the token is cancelled.
///
/// Undecodable payloads are logged and skipped; the channel is shared
/// with future producers, so an unknown message must never kill the
/// listener.
pub async fn spawn_redis_invalidation_listener(
    pool: &Pool,
    cache: Arc<dyn LookupCache>,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, AuthError> {
    // Dedicated subscriber client; Pool does not speak pub/sub directly.
    let client = pool.next();
    let subscriber = SubscriberClient::new(
        client.client_config(),
        None,
        None,
        client.client_reconnect_policy(),
    );
    let _connect = subscriber.connect();
    subscriber
        .wait_for_connect()
        .await
        .map_err(|err| AuthError::bus(format!("subscriber connect: {err}")))?;
    subscriber
        .subscribe(INVALIDATION_CHANNEL)
        .await
        .map_err(|err| AuthError::bus(format!("subscribe {INVALIDATION_CHANNEL}: {err}")))?;

    Ok(tokio::spawn(async move {
        let mut messages = subscriber.message_rx();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = messages.recv() => match received {
                    Ok(message) => {
                        let Some(payload) = message.value.as_str() else {
                            warn!("non-string payload on invalidation channel");
                            continue;
                        };
                        match serde_json::from_str::<InvalidationEvent>(&payload) {
                            Ok(event) => apply_invalidation(cache.as_ref(), &event).await,
                            Err(err) => {
                                warn!(%err, "undecodable invalidation event; skipping");
                            }
                        }
                    }
                    Err(_) => break,
                },
            }
        }
        let _ = subscriber.unsubscribe(INVALIDATION_CHANNEL).await;
        let _ = subscriber.quit().await;
        debug!("redis invalidation listener stopped");
    }))
}
