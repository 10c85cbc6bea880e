//! Cross-instance invalidation tests.
//!
//! Two "instances" share one durable store and one bus transport but hold
//! independent lookaside caches, the way two replicas of the service
//! would. Propagation is best-effort and unordered, so cross-instance
//! assertions poll with a bounded timeout instead of asserting once.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use credhub_authn::{
    AuthMetrics, HashPolicy, HashSuite, KeyCreation, LocalBus, MemoryLookupCache, TokenManager,
    bus::{InvalidationEvent, apply_invalidation, spawn_invalidation_listener},
    cache::{CacheConfig, LookupCache},
    hash::{Algorithm, Argon2Params},
    ssh_key::{CreateKey, KeyRegistry},
    token::CreateToken,
};
use credhub_store::{Id, MemorySshKeyStore, MemoryTokenStore};
use tokio_util::sync::CancellationToken;

/// Propagation bound for cross-instance assertions.
const PROPAGATION_WINDOW: Duration = Duration::from_secs(5);

const ED25519_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDn0IXgcIWCITqFKOAcDpE25dcizIstlHFWsPkDkODso";

// ---------------------------------------------------------------------------
// Harness: two instances, shared store and bus, independent caches
// ---------------------------------------------------------------------------

struct Instance {
    tokens: TokenManager,
    keys: KeyRegistry,
    cache: Arc<MemoryLookupCache>,
}

fn fast_suite(metrics: Arc<AuthMetrics>) -> HashSuite {
    HashSuite::new(
        HashPolicy { preferred: Algorithm::Argon2id, allow_fallback: false },
        Argon2Params { time_cost: 1, memory_kib: 8, parallelism: 1 },
        4,
        metrics,
    )
}

fn two_instances(cancel: &CancellationToken) -> (Instance, Instance) {
    let token_store = MemoryTokenStore::new();
    let key_store = MemorySshKeyStore::new();
    let bus = LocalBus::new();

    let mut instances = Vec::new();
    for _ in 0..2 {
        let metrics = Arc::new(AuthMetrics::new());
        let cache = Arc::new(MemoryLookupCache::default());
        let _listener = spawn_invalidation_listener(
            Arc::clone(&cache) as Arc<dyn LookupCache>,
            bus.subscribe(),
            cancel.clone(),
        );
        instances.push(Instance {
            tokens: TokenManager::new(
                Arc::new(token_store.clone()),
                fast_suite(Arc::clone(&metrics)),
                Arc::clone(&cache) as Arc<dyn LookupCache>,
                Arc::new(bus.clone()),
                CacheConfig::default(),
                metrics,
            ),
            keys: KeyRegistry::new(
                Arc::new(key_store.clone()),
                Arc::clone(&cache) as Arc<dyn LookupCache>,
                Arc::new(bus.clone()),
                CacheConfig::default(),
            ),
            cache,
        });
    }
    let b = instances.pop().expect("instance b");
    let a = instances.pop().expect("instance a");
    (a, b)
}

/// Polls `probe` until it returns true or the propagation window closes.
async fn eventually<F, Fut>(mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + PROPAGATION_WINDOW;
    while tokio::time::Instant::now() < deadline {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Test: token revocation propagates
// ---------------------------------------------------------------------------

/// A revoke on instance A evicts instance B's warm positive cache entry
/// within the propagation window.
#[tokio::test]
async fn revoke_on_one_instance_reaches_the_other() {
    let cancel = CancellationToken::new();
    let (a, b) = two_instances(&cancel);
    let user = Id::generate();

    let created = a
        .tokens
        .create(&user, CreateToken { label: Some("shared".into()), ..CreateToken::default() })
        .await
        .expect("create");

    // Warm B's cache with a positive entry.
    assert!(b.tokens.introspect(&created.token).await.expect("introspect").active);

    assert!(a.tokens.revoke(&user, &created.id).await.expect("revoke"));

    // A sees it immediately; B within the window.
    assert!(!a.tokens.introspect(&created.token).await.expect("introspect").active);
    let propagated = eventually(|| {
        let manager = b.tokens.clone();
        let token = created.token.clone();
        async move { !manager.introspect(&token).await.expect("introspect").active }
    })
    .await;
    assert!(propagated, "instance B still served the revoked token after the window");

    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: SSH key removal propagates
// ---------------------------------------------------------------------------

/// Removing a key on instance A evicts instance B's cached owner lookup.
#[tokio::test]
async fn key_removal_on_one_instance_reaches_the_other() {
    let cancel = CancellationToken::new();
    let (a, b) = two_instances(&cancel);
    let user = Id::generate();

    let created = a
        .keys
        .create(&user, CreateKey { key_name: None, public_key: ED25519_KEY.to_string() })
        .await
        .expect("create");
    let KeyCreation::Created(record) = created else {
        panic!("first submission must create");
    };

    // Warm B's cache.
    assert_eq!(
        b.keys.lookup_owner(&record.fingerprint).await.expect("lookup"),
        Some(user.clone())
    );

    assert!(a.keys.remove(&user, &record.id).await.expect("remove"));

    let propagated = eventually(|| {
        let registry = b.keys.clone();
        let fingerprint = record.fingerprint.clone();
        async move { registry.lookup_owner(&fingerprint).await.expect("lookup").is_none() }
    })
    .await;
    assert!(propagated, "instance B still resolved the removed key after the window");

    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: duplicate delivery is harmless
// ---------------------------------------------------------------------------

/// The bus is at-least-once; applying the same event repeatedly must be a
/// no-op after the first.
#[tokio::test]
async fn duplicate_events_are_idempotent() {
    let cancel = CancellationToken::new();
    let (a, _b) = two_instances(&cancel);
    let user = Id::generate();

    let created = a
        .tokens
        .create(&user, CreateToken::default())
        .await
        .expect("create");
    assert!(a.tokens.introspect(&created.token).await.expect("introspect").active);

    let event = InvalidationEvent::token_revoked(
        &created.hash_prefix,
        user.as_str(),
        created.id.as_str(),
    );
    for _ in 0..3 {
        apply_invalidation(a.cache.as_ref(), &event).await;
    }

    // The token is still active in the store; eviction only forces a
    // re-derive, never a state change.
    assert!(a.tokens.introspect(&created.token).await.expect("introspect").active);

    cancel.cancel();
}
