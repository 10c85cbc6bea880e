//! Cross-instance cache invalidation protocol.
//!
//! Every service instance holds its own lookaside cache, so a revoke on one
//! instance must evict stale entries everywhere else. The owning instance
//! invalidates its local cache synchronously (revocation is immediate where
//! it happened), then publishes a typed [`InvalidationEvent`] on the
//! `auth.cache.invalidate` channel. Peers subscribe and evict on receipt.
//!
//! # Delivery Semantics
//!
//! Best-effort, at-least-once, unordered. Duplicate events are harmless
//! because eviction is idempotent; a lost event is bounded by the cache
//! entry's TTL. Publish failures never fail the mutation that triggered
//! them — the store update already succeeded.
//!
//! # Wire Format
//!
//! JSON: `{"type": "token.revoked" | "sshkey.removed", "key": <hashPrefix |
//! fingerprint>, "userId": ..., "resourceId": ...}`. Consumers key off
//! `key` and ignore unknown `type` tags, so the protocol can grow without
//! breaking old instances.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    cache::{LookupCache, introspect_key, ssh_key_key},
    error::AuthError,
};

/// Pub/sub channel carrying invalidation events.
pub const INVALIDATION_CHANNEL: &str = "auth.cache.invalidate";

/// Capacity of the local broadcast channel.
const LOCAL_BUS_CAPACITY: usize = 256;

/// The kind of resource an invalidation event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A personal access token was revoked; `key` is its hash prefix.
    #[serde(rename = "token.revoked")]
    Token,
    /// An SSH key was removed; `key` is its fingerprint.
    #[serde(rename = "sshkey.removed")]
    SshKey,
    /// Any tag this instance does not understand. Ignored on receipt.
    #[serde(other)]
    Unknown,
}

/// A typed cache-invalidation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    /// Resource kind; doubles as the wire `type` tag.
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Hash prefix or fingerprint — whatever the cache is keyed by.
    pub key: String,
    /// Owner of the invalidated resource.
    pub user_id: String,
    /// Identity of the invalidated resource.
    pub resource_id: String,
}

impl InvalidationEvent {
    /// Builds a token-revocation event.
    pub fn token_revoked(hash_prefix: &str, user_id: &str, token_id: &str) -> Self {
        Self {
            kind: ResourceKind::Token,
            key: hash_prefix.to_string(),
            user_id: user_id.to_string(),
            resource_id: token_id.to_string(),
        }
    }

    /// Builds an SSH-key-removal event.
    pub fn ssh_key_removed(fingerprint: &str, user_id: &str, key_id: &str) -> Self {
        Self {
            kind: ResourceKind::SshKey,
            key: fingerprint.to_string(),
            user_id: user_id.to_string(),
            resource_id: key_id.to_string(),
        }
    }

    /// The namespaced lookaside-cache key this event should evict, or
    /// `None` for unknown kinds.
    pub fn cache_key(&self) -> Option<String> {
        match self.kind {
            ResourceKind::Token => Some(introspect_key(&self.key)),
            ResourceKind::SshKey => Some(ssh_key_key(&self.key)),
            ResourceKind::Unknown => None,
        }
    }
}

/// Publishing side of the invalidation bus.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Publishes an event to all subscribed instances.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Bus`] on transport failure. Callers log and
    /// continue; the mutation that triggered the publish stands.
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), AuthError>;
}

/// Applies one received event to the local cache. Idempotent.
pub async fn apply_invalidation(cache: &dyn LookupCache, event: &InvalidationEvent) {
    match event.cache_key() {
        Some(key) => {
            trace!(key, kind = ?event.kind, "evicting cache entry for invalidation event");
            cache.invalidate(&key).await;
        }
        None => debug!(?event, "ignoring invalidation event of unknown kind"),
    }
}

/// In-process bus over a tokio broadcast channel.
///
/// Serves single-process deployments and tests that simulate multiple
/// instances sharing one transport. Cheap to clone.
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl LocalBus {
    /// Creates a bus with a bounded event backlog.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOCAL_BUS_CAPACITY);
        Self { sender }
    }

    /// Opens a new subscription to the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationBus for LocalBus {
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), AuthError> {
        // A send error only means no subscriber is currently listening,
        // which is a legitimate single-instance configuration.
        if self.sender.send(event.clone()).is_err() {
            trace!(?event, "no invalidation subscribers");
        }
        Ok(())
    }
}

/// Bus implementation that publishes nowhere.
///
/// Selected at wiring time for single-instance deployments without a
/// pub/sub backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBus;

#[async_trait]
impl InvalidationBus for NoopBus {
    async fn publish(&self, _event: &InvalidationEvent) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Spawns a listener that applies bus events to a local cache until the
/// token is cancelled.
///
/// Lagged receivers skip ahead rather than aborting: a missed eviction is
/// bounded by the cache TTL, while a dead listener would be unbounded
/// staleness.
pub fn spawn_invalidation_listener(
    cache: Arc<dyn LookupCache>,
    mut receiver: broadcast::Receiver<InvalidationEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(event) => apply_invalidation(cache.as_ref(), &event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "invalidation listener lagged; cache may serve stale entries until TTL");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("invalidation listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_protocol() {
        let event = InvalidationEvent::token_revoked("deadbeef", "u1", "t1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "token.revoked");
        assert_eq!(json["key"], "deadbeef");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["resourceId"], "t1");
    }

    #[test]
    fn unknown_kinds_deserialize_and_are_ignored() {
        let raw = r#"{"type":"future.kind","key":"k","userId":"u","resourceId":"r"}"#;
        let event: InvalidationEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind, ResourceKind::Unknown);
        assert!(event.cache_key().is_none());
    }

    #[test]
    fn cache_keys_are_namespaced_by_kind() {
        let token = InvalidationEvent::token_revoked("deadbeef", "u", "t");
        assert_eq!(token.cache_key().unwrap(), "introspect:deadbeef");
        let key = InvalidationEvent::ssh_key_removed("SHA256:abc", "u", "k");
        assert_eq!(key.cache_key().unwrap(), "sshkey:SHA256:abc");
    }
}
