//! Credential subsystem error types.
//!
//! The taxonomy follows the caller-visible contract:
//!
//! - [`AuthError::Validation`] — user-correctable input problems (HTTP 400)
//! - [`AuthError::RateLimited`] — budget exhausted (HTTP 429), carries the window state
//! - [`AuthError::KeyConflict`] — SSH key fingerprint owned by another user (HTTP 409)
//! - [`AuthError::Configuration`] — refused silent security downgrade (HTTP 500, fatal)
//! - [`AuthError::Store`] — durable store failures (HTTP 500, except translated duplicates)
//! - [`AuthError::Hashing`] — secret digest generation failed (HTTP 500)
//! - [`AuthError::CounterUnavailable`] / [`AuthError::Bus`] — degraded infrastructure; callers
//!   decide between fail-open, fail-closed, and log-and-continue
//!
//! Verification failures are deliberately *not* errors: a cryptographic
//! library error during verify must be indistinguishable from "wrong
//! secret", so verify paths resolve to `false` instead of returning here.

use thiserror::Error;

use credhub_store::StoreError;

use crate::rate_limit::RateLimitInfo;

/// Result type alias for credential operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur in the credential core.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed input: public key grammar, fingerprint shape, token
    /// encoding, or a missing required field.
    #[error("Validation failed: {message}")]
    Validation {
        /// User-facing description of what failed validation.
        message: String,
    },

    /// A rate-limit budget was exhausted for the caller's key.
    ///
    /// Carries the same shape as a successful consume so callers can emit
    /// `Retry-After` style hints without a second lookup.
    #[error("Rate limit exceeded; retry in {}ms", info.ms_before_next)]
    RateLimited {
        /// Window state at the time of denial.
        info: RateLimitInfo,
    },

    /// An SSH key with the same fingerprint already belongs to a different
    /// user.
    #[error("Public key already registered for a different user")]
    KeyConflict {
        /// The contested fingerprint.
        fingerprint: String,
    },

    /// The configured hash algorithm is unavailable and fallback was not
    /// explicitly allowed. Intentionally fatal — never silently downgrade.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the misconfiguration.
        message: String,
    },

    /// A durable store operation failed.
    #[error("Store error")]
    Store(#[from] StoreError),

    /// Producing a secret digest failed.
    #[error("Hashing failed: {message}")]
    Hashing {
        /// Description of the hashing failure.
        message: String,
    },

    /// The rate limiter's backing counter store is unreachable or timed out.
    ///
    /// Whether this fails the request (closed) or is waved through (open)
    /// is the limiter policy's decision, not the caller's.
    #[error("Rate limit counter store unavailable: {message}")]
    CounterUnavailable {
        /// Description of the counter store failure.
        message: String,
    },

    /// Publishing to the invalidation bus failed. Always non-fatal to the
    /// mutation that triggered the publish.
    #[error("Invalidation bus error: {message}")]
    Bus {
        /// Description of the bus failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a [`AuthError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a [`AuthError::Configuration`] with the given message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a [`AuthError::Hashing`] with the given message.
    pub fn hashing(message: impl Into<String>) -> Self {
        Self::Hashing { message: message.into() }
    }

    /// Creates a [`AuthError::CounterUnavailable`] with the given message.
    pub fn counter_unavailable(message: impl Into<String>) -> Self {
        Self::CounterUnavailable { message: message.into() }
    }

    /// Creates a [`AuthError::Bus`] with the given message.
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus { message: message.into() }
    }

    /// Returns `true` for rate-limit denials.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` for user-correctable validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
