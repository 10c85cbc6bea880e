//! Key registry behavior against in-memory collaborators.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use credhub_authn::{
    KeyCreation, MemoryLookupCache, NoopBus,
    cache::CacheConfig,
    error::AuthError,
    ssh_key::{CreateKey, KeyRegistry},
};
use credhub_store::{Id, MemorySshKeyStore};
use tokio::task::JoinSet;

/// Concurrent identical submissions for the convergence test.
const CONCURRENCY: usize = 40;

const ED25519_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDn0IXgcIWCITqFKOAcDpE25dcizIstlHFWsPkDkODso";

fn registry() -> KeyRegistry {
    KeyRegistry::new(
        Arc::new(MemorySshKeyStore::new()),
        Arc::new(MemoryLookupCache::default()),
        Arc::new(NoopBus),
        CacheConfig::default(),
    )
}

fn submission(key: &str) -> CreateKey {
    CreateKey { key_name: Some("laptop".to_string()), public_key: key.to_string() }
}

// ---------------------------------------------------------------------------
// Test: creation outcomes
// ---------------------------------------------------------------------------

/// First submission creates; an identical re-submission by the same user
/// converges on the canonical row instead of erroring.
#[tokio::test]
async fn resubmission_by_owner_is_idempotent() {
    let registry = registry();
    let user = Id::generate();

    let first = registry.create(&user, submission(ED25519_KEY)).await.expect("create");
    let KeyCreation::Created(record) = first else {
        panic!("first submission must create");
    };

    // Different comment, same key data: same fingerprint.
    let again = registry
        .create(&user, submission(&format!("{ED25519_KEY} user@host")))
        .await
        .expect("create");
    match again {
        KeyCreation::AlreadyOwned(existing) => assert_eq!(existing.id, record.id),
        other => panic!("expected AlreadyOwned, got {other:?}"),
    }

    assert_eq!(registry.list(user.as_str()).await.expect("list").len(), 1);
}

/// The same key submitted by a different user is a real conflict.
#[tokio::test]
async fn key_held_by_another_user_conflicts() {
    let registry = registry();
    let owner = Id::generate();
    registry.create(&owner, submission(ED25519_KEY)).await.expect("create");

    let intruder = Id::generate();
    let err = registry.create(&intruder, submission(ED25519_KEY)).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyConflict { .. }), "got {err:?}");
    assert!(registry.list(intruder.as_str()).await.expect("list").is_empty());
}

/// Malformed key text is a validation error, never a store write.
#[tokio::test]
async fn malformed_keys_are_rejected() {
    let registry = registry();
    let user = Id::generate();

    let err = registry
        .create(&user, submission("not-a-valid-ssh-key"))
        .await
        .unwrap_err();
    assert!(err.is_validation(), "got {err:?}");
    assert!(registry.list(user.as_str()).await.expect("list").is_empty());
}

// ---------------------------------------------------------------------------
// Test: concurrent identical creation converges
// ---------------------------------------------------------------------------

/// N concurrent identical submissions end with exactly one stored key;
/// every caller observes the same logical resource, created or
/// already-owned.
#[tokio::test]
async fn concurrent_identical_submissions_converge() {
    let registry = registry();
    let user = Id::generate();

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let registry = registry.clone();
        let user = user.clone();
        set.spawn(async move { registry.create(&user, submission(ED25519_KEY)).await });
    }

    let mut created = 0;
    let mut converged = 0;
    while let Some(result) = set.join_next().await {
        match result.expect("task panicked").expect("create failed") {
            KeyCreation::Created(_) => created += 1,
            KeyCreation::AlreadyOwned(_) => converged += 1,
        }
    }
    assert_eq!(created, 1, "exactly one caller creates the resource");
    assert_eq!(converged, CONCURRENCY - 1);
    assert_eq!(registry.list(user.as_str()).await.expect("list").len(), 1);
}

// ---------------------------------------------------------------------------
// Test: removal and lookup
// ---------------------------------------------------------------------------

/// Removal is owner-scoped; a miss is "not found", not an error.
#[tokio::test]
async fn removal_is_owner_scoped() {
    let registry = registry();
    let user = Id::generate();
    let created = registry.create(&user, submission(ED25519_KEY)).await.expect("create");
    let record = created.record().clone();

    let stranger = Id::generate();
    assert!(!registry.remove(&stranger, &record.id).await.expect("remove"));

    assert!(registry.remove(&user, &record.id).await.expect("remove"));
    assert!(!registry.remove(&user, &record.id).await.expect("remove"));
    assert!(registry.list(user.as_str()).await.expect("list").is_empty());
}

/// Fingerprint lookup validates shape before touching cache or store.
#[tokio::test]
async fn lookup_enforces_fingerprint_shape() {
    let registry = registry();
    let user = Id::generate();
    let created = registry.create(&user, submission(ED25519_KEY)).await.expect("create");
    let fingerprint = created.record().fingerprint.clone();

    assert_eq!(registry.lookup_owner(&fingerprint).await.expect("lookup"), Some(user));

    let err = registry.lookup_owner("abcdef").await.unwrap_err();
    assert!(err.is_validation(), "got {err:?}");

    // Well-formed but unknown resolves to None, and the second call is
    // served by the cached negative.
    let unknown = format!("SHA256:{}", "A".repeat(44));
    assert!(registry.lookup_owner(&unknown).await.expect("lookup").is_none());
    assert!(registry.lookup_owner(&unknown).await.expect("lookup").is_none());
}
