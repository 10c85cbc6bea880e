//! Store error types and result alias.
//!
//! All backends map their internal failures to [`StoreError`]. The one
//! variant with contractual significance to callers is
//! [`StoreError::Duplicate`]: a unique-index violation on SSH key
//! fingerprints, which the key registry translates into an idempotent
//! "already exists" response instead of an opaque server error.

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The requested record was not found.
    #[error("Record not found: {key}")]
    NotFound {
        /// Description of the record that was not found.
        key: String,
    },

    /// A unique-index constraint was violated on insert.
    ///
    /// For SSH keys this is the fingerprint index, and it is the sole
    /// mechanism preventing duplicate keys under concurrent identical
    /// submissions.
    #[error("Duplicate value for unique index {index}: {value}")]
    Duplicate {
        /// The unique index that rejected the insert.
        index: String,
        /// The duplicated value.
        value: String,
    },

    /// An identifier failed structural validation.
    ///
    /// Callers that list by user id are expected to degrade a malformed id
    /// to an empty result instead of surfacing this error.
    #[error("Invalid identifier: {value}")]
    InvalidId {
        /// The malformed identifier.
        value: String,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error, when available.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error, when available.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation exceeded its time limit.
    #[error("Operation timeout")]
    Timeout,
}

impl StoreError {
    /// Creates a [`StoreError::NotFound`] for the given record description.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a [`StoreError::Duplicate`] for the given index and value.
    pub fn duplicate(index: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duplicate { index: index.into(), value: value.into() }
    }

    /// Creates a [`StoreError::InvalidId`] for the given raw identifier.
    pub fn invalid_id(value: impl Into<String>) -> Self {
        Self::InvalidId { value: value.into() }
    }

    /// Creates a [`StoreError::Internal`] with a message and no source.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` if this error is a unique-index violation.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns `true` if this error is a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_classified() {
        let err = StoreError::duplicate("fingerprint", "SHA256:abc");
        assert!(err.is_duplicate());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Duplicate value for unique index fingerprint: SHA256:abc"
        );
    }

    #[test]
    fn not_found_is_classified() {
        let err = StoreError::not_found("token 123");
        assert!(err.is_not_found());
        assert!(!err.is_duplicate());
    }
}
