//! End-to-end token lifecycle tests against in-memory collaborators.
//!
//! These exercise the real wiring — hash suite, lookaside cache, bus —
//! with only the durable store and transports swapped for in-memory
//! implementations.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use credhub_authn::{
    AuthMetrics, HashPolicy, HashSuite, LocalBus, MemoryLookupCache, TokenManager,
    cache::CacheConfig,
    hash::{Algorithm, Argon2Params},
    token::{CreateToken, hash_prefix},
};
use credhub_store::{Id, MemoryTokenStore};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    manager: TokenManager,
    metrics: Arc<AuthMetrics>,
}

/// Cheap argon2 parameters keep the suite fast; the cost knobs are not
/// under test here.
fn fast_suite(metrics: Arc<AuthMetrics>) -> HashSuite {
    HashSuite::new(
        HashPolicy { preferred: Algorithm::Argon2id, allow_fallback: false },
        Argon2Params { time_cost: 1, memory_kib: 8, parallelism: 1 },
        4,
        metrics,
    )
}

fn harness() -> Harness {
    let metrics = Arc::new(AuthMetrics::new());
    let manager = TokenManager::new(
        Arc::new(MemoryTokenStore::new()),
        fast_suite(Arc::clone(&metrics)),
        Arc::new(MemoryLookupCache::default()),
        Arc::new(LocalBus::new()),
        CacheConfig::default(),
        Arc::clone(&metrics),
    );
    Harness { manager, metrics }
}

fn request(label: &str) -> CreateToken {
    CreateToken { label: Some(label.to_string()), ..CreateToken::default() }
}

// ---------------------------------------------------------------------------
// Test: hash-prefix contract
// ---------------------------------------------------------------------------

/// The partial shown at creation is the leading 8 hex chars of the
/// plaintext's SHA-256, and the exact same value appears in the list.
#[tokio::test]
async fn created_partial_matches_listed_prefix() {
    let h = harness();
    let user = Id::generate();

    let created = h
        .manager
        .create(&user, request("contract-hash-prefix"))
        .await
        .expect("create");

    assert_eq!(created.hash_prefix.len(), 8);
    assert!(created.hash_prefix.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    assert_eq!(created.hash_prefix, hash_prefix(&created.token));

    let listed = h.manager.list(user.as_str()).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].hash_prefix, created.hash_prefix);
    assert_eq!(listed[0].label, "contract-hash-prefix");
    // The plaintext never appears in a stored record.
    assert_ne!(listed[0].hash, created.token);
}

// ---------------------------------------------------------------------------
// Test: introspection and same-instance revocation
// ---------------------------------------------------------------------------

/// A revoke is visible to the very next introspect on the same instance,
/// even with a warm cache entry — no polling.
#[tokio::test]
async fn revoke_is_immediately_visible_locally() {
    let h = harness();
    let user = Id::generate();
    let created = h.manager.create(&user, request("ci")).await.expect("create");

    let before = h.manager.introspect(&created.token).await.expect("introspect");
    assert!(before.active);
    assert_eq!(before.user_id.as_ref(), Some(&user));
    assert_eq!(before.hash_prefix.as_deref(), Some(created.hash_prefix.as_str()));

    // Warm the cache so the revoke actually has something to evict.
    let warm = h.manager.introspect(&created.token).await.expect("introspect");
    assert!(warm.active);

    assert!(h.manager.revoke(&user, &created.id).await.expect("revoke"));
    let after = h.manager.introspect(&created.token).await.expect("introspect");
    assert!(!after.active);
    assert!(after.user_id.is_none());
}

/// Revoking an absent or foreign token is "not found", not an error, and
/// a second concurrent-style revoke of the same token is a no-op.
#[tokio::test]
async fn revoke_misses_are_not_errors() {
    let h = harness();
    let user = Id::generate();
    let created = h.manager.create(&user, request("once")).await.expect("create");

    let stranger = Id::generate();
    assert!(!h.manager.revoke(&stranger, &created.id).await.expect("revoke"));

    assert!(h.manager.revoke(&user, &created.id).await.expect("revoke"));
    assert!(!h.manager.revoke(&user, &created.id).await.expect("revoke"));
}

/// Malformed plaintext cannot match a candidate and resolves inactive
/// without an error.
#[tokio::test]
async fn garbage_plaintext_introspects_inactive() {
    let h = harness();
    for garbage in ["", "not-hex", "deadbeef", &"0".repeat(64)] {
        let result = h.manager.introspect(garbage).await.expect("introspect");
        assert!(!result.active, "{garbage:?} introspected active");
    }
}

/// A repeated negative introspect is answered from the cache.
#[tokio::test]
async fn negative_results_are_cached() {
    let h = harness();

    h.manager.introspect("no-such-token").await.expect("introspect");
    let misses_after_first = h.metrics.snapshot().cache_misses;

    h.manager.introspect("no-such-token").await.expect("introspect");
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.cache_misses, misses_after_first);
    assert!(snapshot.cache_hits >= 1);
}

/// A verified introspection stamps `last_used_at` on the stored record.
#[tokio::test]
async fn verified_introspect_stamps_last_used() {
    let h = harness();
    let user = Id::generate();
    let created = h.manager.create(&user, request("usage")).await.expect("create");

    let listed = h.manager.list(user.as_str()).await.expect("list");
    assert!(listed[0].last_used_at.is_none(), "unused token must carry no usage stamp");

    let before = Utc::now();
    assert!(h.manager.introspect(&created.token).await.expect("introspect").active);

    let listed = h.manager.list(user.as_str()).await.expect("list");
    let last_used = listed[0].last_used_at.expect("last_used_at set by introspection");
    assert!(last_used >= before);
}

// ---------------------------------------------------------------------------
// Test: expiry
// ---------------------------------------------------------------------------

/// Expiry is evaluated lazily at introspection time: the record stays in
/// the store and the list, but introspects inactive.
#[tokio::test]
async fn expired_tokens_introspect_inactive_but_remain_listed() {
    let h = harness();
    let user = Id::generate();

    let created = h
        .manager
        .create(
            &user,
            CreateToken {
                label: Some("expired".to_string()),
                expires_at: Some(Utc::now() - ChronoDuration::minutes(1)),
                ..CreateToken::default()
            },
        )
        .await
        .expect("create");

    let result = h.manager.introspect(&created.token).await.expect("introspect");
    assert!(!result.active);

    let listed = h.manager.list(user.as_str()).await.expect("list");
    assert_eq!(listed.len(), 1, "expired token must not be deleted");
    assert!(listed[0].active, "store record is untouched; expiry is lazy");
}

// ---------------------------------------------------------------------------
// Test: rotate and retire
// ---------------------------------------------------------------------------

/// `replace` retires every active predecessor with the same label before
/// issuing the new token.
#[tokio::test]
async fn replace_retires_predecessors_with_same_label() {
    let h = harness();
    let user = Id::generate();

    let first = h.manager.create(&user, request("deploy-key")).await.expect("create");
    let other = h.manager.create(&user, request("unrelated")).await.expect("create");

    let rotated = h
        .manager
        .create(
            &user,
            CreateToken { label: Some("deploy-key".to_string()), replace: true, ..CreateToken::default() },
        )
        .await
        .expect("create");

    assert!(!h.manager.introspect(&first.token).await.expect("introspect").active);
    assert!(h.manager.introspect(&rotated.token).await.expect("introspect").active);
    assert!(h.manager.introspect(&other.token).await.expect("introspect").active);

    let active: Vec<_> = h
        .manager
        .list(user.as_str())
        .await
        .expect("list")
        .into_iter()
        .filter(|t| t.active)
        .collect();
    assert_eq!(active.len(), 2);
}

// ---------------------------------------------------------------------------
// Test: defensive list guard
// ---------------------------------------------------------------------------

/// A malformed user id from a path parameter degrades to an empty list.
#[tokio::test]
async fn malformed_user_id_lists_empty() {
    let h = harness();
    let user = Id::generate();
    h.manager.create(&user, request("real")).await.expect("create");

    for bad in ["", "not-an-id", "UPPERCASEHEX0123456789AB"] {
        let listed = h.manager.list(bad).await.expect("list");
        assert!(listed.is_empty(), "{bad:?} listed {} tokens", listed.len());
    }

    // Sanity: a real id still lists.
    assert_eq!(h.manager.list(user.as_str()).await.expect("list").len(), 1);
}
