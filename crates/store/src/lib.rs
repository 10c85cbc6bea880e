//! # Credhub Durable Store
//!
//! Store abstractions for the credential subsystem: personal access tokens
//! and SSH public keys.
//!
//! This crate provides:
//! - **Typed records**: [`AccessTokenRecord`], [`SshKeyRecord`] and their insert shapes
//! - **Store traits**: [`TokenStore`], [`SshKeyStore`] with the exact operations the lifecycle
//!   managers need — nothing more
//! - **Reference backends**: in-memory implementations suitable for tests and development
//!
//! # Design Philosophy
//!
//! The durable store is treated as an external collaborator with
//! find/insert/update/delete semantics plus one load-bearing guarantee: a
//! unique index on SSH key fingerprints. Concurrent identical-key creation
//! converges to a single row because the *store* rejects the second insert
//! with [`StoreError::Duplicate`] — the application layer must never attempt
//! its own read-then-write locking in place of this constraint.
//!
//! Token revocation is a single atomic conditional update (`active = false`
//! where id and owner match), safe under concurrent revoke attempts: the
//! second caller simply observes "not found".
//!
//! # Example
//!
//! ```
//! use credhub_store::{MemoryTokenStore, NewAccessToken, TokenStore, UserId};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryTokenStore::new();
//! let user = UserId::generate();
//!
//! let record = store
//!     .insert(NewAccessToken {
//!         user_id: user.clone(),
//!         label: "ci".into(),
//!         hash: "$argon2id$...".into(),
//!         hash_prefix: "deadbeef".into(),
//!         algorithm: "argon2id".into(),
//!         scopes: vec![],
//!         expires_at: None,
//!     })
//!     .await
//!     .unwrap();
//!
//! assert!(record.active);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Store error types.
pub mod error;
/// In-memory reference backends.
pub mod memory;
/// SSH key store trait.
pub mod ssh_key_store;
/// Shared test helpers (feature-gated).
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Access token store trait.
pub mod token_store;
/// Record types and identifiers.
pub mod types;
/// Read-time user display joins.
pub mod user_directory;

pub use error::{StoreError, StoreResult};
pub use memory::{MemorySshKeyStore, MemoryTokenStore};
pub use ssh_key_store::SshKeyStore;
pub use token_store::TokenStore;
pub use types::{AccessTokenRecord, Id, NewAccessToken, NewSshKey, SshKeyRecord, UserId};
pub use user_directory::{MemoryUserDirectory, UserDirectory, UserDisplay};
