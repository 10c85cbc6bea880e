//! Pluggable secret hashing with ordered fallback.
//!
//! Token secrets are stored as password-grade digests. The preferred
//! algorithm is a memory-hard KDF (argon2id), with bcrypt as the classic
//! fallback and a salted PBKDF2-HMAC-SHA256 derivation as the last resort
//! so the subsystem stays functional in degraded environments.
//!
//! # Algorithm Selection
//!
//! Selection is a strategy list tried in priority order, not a chain of
//! conditionals:
//!
//! 1. If the preferred algorithm's strategy is available, use it.
//! 2. If it is unavailable and fallback is **not** explicitly allowed, fail
//!    with [`AuthError::Configuration`] — never silently downgrade.
//! 3. Otherwise use the first available strategy in registration order.
//! 4. The last-resort KDF is always available; using it increments the
//!    `degraded_hashes` metric and logs a warning so operators notice.
//!
//! # Verification
//!
//! Verification dispatches on the *shape* of the stored digest (`$argon2`,
//! `$2`, `pbkdf2$`) — never by trial-verifying with every algorithm, which
//! would waste work and leak a timing signal. Any internal error during
//! verification resolves to `false`: a library failure must be
//! indistinguishable from a wrong secret.
//!
//! # CPU Cost
//!
//! KDFs are an intentional, bounded CPU cost per request. [`HashSuite`]
//! runs them on `spawn_blocking` so a memory-hard derivation never parks a
//! request-handling worker.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use crate::{error::AuthError, metrics::AuthMetrics};

/// Supported hash algorithms, in descending order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Memory-hard KDF; the default.
    Argon2id,
    /// Classic adaptive KDF.
    Bcrypt,
    /// Salted iterative derivation; last resort only.
    Pbkdf2,
}

impl Algorithm {
    /// Returns the stable tag persisted on token documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Argon2id => "argon2id",
            Self::Bcrypt => "bcrypt",
            Self::Pbkdf2 => "pbkdf2",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A digest paired with the tag of the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedSecret {
    /// Algorithm-specific digest text.
    pub digest: String,
    /// Producing algorithm.
    pub algorithm: Algorithm,
}

/// Policy for algorithm selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashPolicy {
    /// The algorithm to prefer.
    pub preferred: Algorithm,
    /// Whether a missing preferred algorithm may silently fall back to the
    /// next available strategy. Off by default: a downgrade must be an
    /// explicit operator decision.
    pub allow_fallback: bool,
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self { preferred: Algorithm::Argon2id, allow_fallback: false }
    }
}

/// Cost parameters for the argon2id strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Argon2Params {
    /// Number of iterations.
    pub time_cost: u32,
    /// Memory budget in KiB.
    pub memory_kib: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self { time_cost: 2, memory_kib: 65_536, parallelism: 4 }
    }
}

/// One hashing algorithm implementation.
///
/// `is_available` exists because deployments have historically run without
/// the preferred native library; strategies report availability so the
/// suite can select per policy instead of probing at call time.
pub trait HashStrategy: Send + Sync {
    /// The algorithm this strategy implements.
    fn algorithm(&self) -> Algorithm;

    /// Whether this strategy can be used in the current environment.
    fn is_available(&self) -> bool {
        true
    }

    /// Returns `true` if `digest` has this algorithm's shape.
    fn matches(&self, digest: &str) -> bool;

    /// Produces a digest of `plaintext`.
    fn hash(&self, plaintext: &str) -> Result<String, AuthError>;

    /// Verifies `plaintext` against a stored digest.
    ///
    /// Never errors: any internal failure is reported as `false`.
    fn verify(&self, plaintext: &str, digest: &str) -> bool;
}

/// argon2id via the RustCrypto `argon2` crate.
pub struct Argon2Strategy {
    params: Argon2Params,
}

impl Argon2Strategy {
    /// Creates the strategy with the given cost parameters.
    pub fn new(params: Argon2Params) -> Self {
        Self { params }
    }

    fn hasher(&self) -> Result<Argon2<'static>, AuthError> {
        let params = argon2::Params::new(
            self.params.memory_kib,
            self.params.time_cost,
            self.params.parallelism,
            None,
        )
        .map_err(|err| AuthError::configuration(format!("invalid argon2 params: {err}")))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params))
    }
}

impl HashStrategy for Argon2Strategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Argon2id
    }

    fn matches(&self, digest: &str) -> bool {
        digest.starts_with("$argon2")
    }

    fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .hasher()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| AuthError::hashing(format!("argon2: {err}")))?;
        Ok(digest.to_string())
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        // Params come from the digest itself, so rotated cost settings
        // still verify old hashes.
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default().verify_password(plaintext.as_bytes(), &parsed).is_ok()
    }
}

/// bcrypt via the `bcrypt` crate.
pub struct BcryptStrategy {
    cost: u32,
}

impl BcryptStrategy {
    /// Creates the strategy with the given work factor.
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl HashStrategy for BcryptStrategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Bcrypt
    }

    fn matches(&self, digest: &str) -> bool {
        digest.starts_with("$2")
    }

    fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        bcrypt::hash(plaintext, self.cost)
            .map_err(|err| AuthError::hashing(format!("bcrypt: {err}")))
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        bcrypt::verify(plaintext, digest).unwrap_or(false)
    }
}

/// Number of PBKDF2 rounds for the last-resort strategy.
const PBKDF2_ROUNDS: u32 = 100_000;

/// Derived key length in bytes.
const PBKDF2_DK_LEN: usize = 64;

/// Salt length in bytes.
const PBKDF2_SALT_LEN: usize = 16;

/// Last-resort salted PBKDF2-HMAC-SHA256 derivation.
///
/// Digest format: `pbkdf2$<salt-hex>$<derived-key-hex>`. Deliberately the
/// least preferred strategy; its use must be observable.
pub struct Pbkdf2Strategy {
    rounds: u32,
}

impl Pbkdf2Strategy {
    /// Creates the strategy with the default round count.
    pub fn new() -> Self {
        Self { rounds: PBKDF2_ROUNDS }
    }

    fn derive(plaintext: &str, salt: &[u8], rounds: u32) -> [u8; PBKDF2_DK_LEN] {
        let mut dk = [0u8; PBKDF2_DK_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), salt, rounds, &mut dk);
        dk
    }
}

impl Default for Pbkdf2Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl HashStrategy for Pbkdf2Strategy {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Pbkdf2
    }

    fn matches(&self, digest: &str) -> bool {
        digest.starts_with("pbkdf2$")
    }

    fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let mut salt = [0u8; PBKDF2_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let dk = Self::derive(plaintext, &salt, self.rounds);
        Ok(format!("pbkdf2${}${}", hex::encode(salt), hex::encode(dk)))
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let mut parts = digest.split('$');
        let (Some("pbkdf2"), Some(salt_hex), Some(expected)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let Ok(salt) = hex::decode(salt_hex) else {
            return false;
        };
        let dk = Self::derive(plaintext, &salt, self.rounds);
        hex::encode(dk) == expected
    }
}

/// Ordered strategy suite plus selection policy.
///
/// Cheap to clone; all clones share the strategy list and metrics.
#[derive(Clone)]
pub struct HashSuite {
    inner: Arc<SuiteInner>,
}

struct SuiteInner {
    strategies: Vec<Box<dyn HashStrategy>>,
    policy: HashPolicy,
    metrics: Arc<AuthMetrics>,
}

impl HashSuite {
    /// Creates a suite with the full strategy registry: argon2id, bcrypt,
    /// PBKDF2, in that order.
    pub fn new(
        policy: HashPolicy,
        argon2: Argon2Params,
        bcrypt_cost: u32,
        metrics: Arc<AuthMetrics>,
    ) -> Self {
        Self::with_strategies(
            policy,
            vec![
                Box::new(Argon2Strategy::new(argon2)),
                Box::new(BcryptStrategy::new(bcrypt_cost)),
                Box::new(Pbkdf2Strategy::new()),
            ],
            metrics,
        )
    }

    /// Creates a suite from an explicit strategy list.
    ///
    /// Tests use this to simulate environments where the preferred
    /// algorithm is unavailable.
    pub fn with_strategies(
        policy: HashPolicy,
        strategies: Vec<Box<dyn HashStrategy>>,
        metrics: Arc<AuthMetrics>,
    ) -> Self {
        Self { inner: Arc::new(SuiteInner { strategies, policy, metrics }) }
    }

    /// Selects the strategy `hash` will use, per policy.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when the preferred algorithm is
    /// unavailable and fallback is disallowed, or when no strategy is
    /// available at all.
    fn select(&self) -> Result<&dyn HashStrategy, AuthError> {
        let inner = &self.inner;
        let preferred = inner
            .strategies
            .iter()
            .find(|s| s.algorithm() == inner.policy.preferred);
        match preferred {
            Some(strategy) if strategy.is_available() => return Ok(strategy.as_ref()),
            _ if !inner.policy.allow_fallback => {
                return Err(AuthError::configuration(format!(
                    "{} configured as preferred hash algorithm but not available; \
                     enable fallback or install the library",
                    inner.policy.preferred
                )));
            }
            _ => {}
        }
        inner
            .strategies
            .iter()
            .find(|s| s.is_available())
            .map(|s| s.as_ref())
            .ok_or_else(|| AuthError::configuration("no hash strategy available"))
    }

    /// Hashes `plaintext` with the selected strategy on a blocking worker.
    pub async fn hash(&self, plaintext: &str) -> Result<HashedSecret, AuthError> {
        // Fail configuration errors before paying the spawn cost.
        let algorithm = self.select()?.algorithm();
        if algorithm == Algorithm::Pbkdf2 {
            warn!(%algorithm, "hashing with last-resort KDF; preferred algorithm unavailable");
            self.inner.metrics.record_degraded_hash();
        }

        let suite = self.clone();
        let plaintext = plaintext.to_string();
        tokio::task::spawn_blocking(move || {
            let strategy = suite.select()?;
            let digest = strategy.hash(&plaintext)?;
            Ok(HashedSecret { digest, algorithm: strategy.algorithm() })
        })
        .await
        .map_err(|err| AuthError::hashing(format!("hash task failed: {err}")))?
    }

    /// Verifies `plaintext` against a stored digest on a blocking worker.
    ///
    /// Dispatches on digest shape; unrecognized shapes and all internal
    /// errors resolve to `false`.
    pub async fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let suite = self.clone();
        let plaintext = plaintext.to_string();
        let digest = digest.to_string();
        tokio::task::spawn_blocking(move || {
            suite
                .inner
                .strategies
                .iter()
                .find(|s| s.is_available() && s.matches(&digest))
                .is_some_and(|s| s.verify(&plaintext, &digest))
        })
        .await
        .unwrap_or(false)
    }
}
