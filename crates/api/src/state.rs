//! Shared application state.

use std::sync::Arc;

use credhub_authn::{
    AuthConfig, AuthMetrics, HashSuite, KeyRegistry, RateLimiter, TokenManager,
    bus::InvalidationBus,
    cache::LookupCache,
    origin::OriginConfig,
    rate_limit::CounterStore,
};
use credhub_store::{SshKeyStore, TokenStore, UserDirectory};

/// Everything the handlers need, wired once at startup. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Token lifecycle manager.
    pub tokens: TokenManager,
    /// SSH key registry.
    pub keys: KeyRegistry,
    /// Read-time join source for key responses.
    pub directory: Arc<dyn UserDirectory>,
    /// Limiter for `POST /tokens/introspect`.
    pub introspect_limiter: Arc<RateLimiter>,
    /// Limiter for `GET /ssh-keys/{fingerprint}`.
    pub fingerprint_limiter: Arc<RateLimiter>,
    /// Limiter for token creation.
    pub create_limiter: Arc<RateLimiter>,
    /// Origin resolution settings.
    pub origin: OriginConfig,
    /// Shared metrics.
    pub metrics: Arc<AuthMetrics>,
}

/// Backing collaborators for [`AppState::new`].
pub struct Backends {
    /// Durable token store.
    pub token_store: Arc<dyn TokenStore>,
    /// Durable SSH key store.
    pub ssh_key_store: Arc<dyn SshKeyStore>,
    /// User display lookup.
    pub directory: Arc<dyn UserDirectory>,
    /// Lookaside cache shared by both managers.
    pub cache: Arc<dyn LookupCache>,
    /// Invalidation bus transport.
    pub bus: Arc<dyn InvalidationBus>,
    /// Shared rate-limit counter store.
    pub counters: Arc<dyn CounterStore>,
}

impl AppState {
    /// Wires the full subsystem from configuration and backends.
    pub fn new(config: AuthConfig, backends: Backends) -> Self {
        let metrics = Arc::new(AuthMetrics::new());
        let suite = HashSuite::new(
            config.hash.policy.clone(),
            config.hash.argon2,
            config.hash.bcrypt_cost.0,
            Arc::clone(&metrics),
        );

        let limiter = |name: &str, quota| {
            Arc::new(RateLimiter::new(
                name,
                quota,
                config.rate_limit.policy,
                Arc::clone(&backends.counters),
                Arc::clone(&metrics),
            ))
        };

        Self {
            tokens: TokenManager::new(
                backends.token_store,
                suite,
                Arc::clone(&backends.cache),
                Arc::clone(&backends.bus),
                config.cache,
                Arc::clone(&metrics),
            ),
            keys: KeyRegistry::new(
                backends.ssh_key_store,
                backends.cache,
                backends.bus,
                config.cache,
            ),
            directory: backends.directory,
            introspect_limiter: limiter("token-introspect", config.rate_limit.token_introspect),
            fingerprint_limiter: limiter(
                "ssh-fingerprint-lookup",
                config.rate_limit.ssh_fingerprint_lookup,
            ),
            create_limiter: limiter("token-create", config.rate_limit.token_create),
            origin: config.origin,
            metrics,
        }
    }
}
