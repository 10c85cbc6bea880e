//! # CredHub HTTP Surface
//!
//! Axum routes over the credential core: token lifecycle for logged-in
//! users, plus service-origin-authenticated introspection and SSH
//! fingerprint lookup for machine callers.
//!
//! Session authentication is owned by the surrounding application; a
//! middleware layer attaches a [`SessionUser`] extension before requests
//! reach this router. Service-origin endpoints identify callers from
//! transport facts only and are rate-limited per origin.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Session identity and origin extraction.
pub mod auth;
/// HTTP error mapping.
pub mod error;
/// SSH key routes.
pub mod ssh_keys;
/// Shared application state.
pub mod state;
/// Token routes.
pub mod tokens;

use axum::{
    Router,
    routing::{delete, get, post},
};

pub use auth::SessionUser;
pub use error::ApiError;
pub use state::{AppState, Backends};

/// Builds the credential router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/users/{user_id}/tokens",
            post(tokens::create_token).get(tokens::list_tokens),
        )
        .route("/users/{user_id}/tokens/{token_id}", delete(tokens::revoke_token))
        .route("/tokens/introspect", post(tokens::introspect_token))
        .route(
            "/users/{user_id}/ssh-keys",
            get(ssh_keys::list_keys).post(ssh_keys::create_key),
        )
        .route("/users/{user_id}/ssh-keys/{key_id}", delete(ssh_keys::remove_key))
        .route("/ssh-keys/{fingerprint}", get(ssh_keys::lookup_key))
        .fallback(tokens::fallback)
        .with_state(state)
}
