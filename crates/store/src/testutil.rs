//! Shared test utilities for store backends.
//!
//! Feature-gated behind `testutil` so helpers never leak into production
//! builds. Downstream crates enable it in dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! credhub-store = { path = "../store", features = ["testutil"] }
//! ```

use crate::types::{NewAccessToken, NewSshKey, UserId};

/// Builds a [`NewAccessToken`] with a throwaway digest.
///
/// The `hash` field holds a PBKDF2-shaped placeholder so digest-dispatch
/// code treats it as a recognizable (if unverifiable) shape.
#[must_use]
pub fn new_token(user_id: &UserId, label: &str, hash_prefix: &str) -> NewAccessToken {
    NewAccessToken {
        user_id: user_id.clone(),
        label: label.to_string(),
        hash: format!("pbkdf2$00$placeholder-{hash_prefix}"),
        hash_prefix: hash_prefix.to_string(),
        algorithm: "pbkdf2".to_string(),
        scopes: Vec::new(),
        expires_at: None,
    }
}

/// Builds a [`NewSshKey`] with a synthetic public key for the fingerprint.
#[must_use]
pub fn new_ssh_key(user_id: &UserId, fingerprint: &str) -> NewSshKey {
    NewSshKey {
        user_id: user_id.clone(),
        key_name: String::new(),
        public_key: format!("ssh-ed25519 AAAAtest {fingerprint}"),
        fingerprint: fingerprint.to_string(),
    }
}
