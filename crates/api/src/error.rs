//! HTTP error mapping.
//!
//! The core's error taxonomy maps onto status codes here and nowhere
//! else:
//!
//! | Core error | Status |
//! |---|---|
//! | `Validation` | 400 |
//! | `RateLimited` | 429 |
//! | `KeyConflict` | 409 |
//! | `Store` not-found | 404 |
//! | everything else | 500, logged |
//!
//! Validation failures are user-correctable and never logged as
//! incidents; 500s carry no internal detail to the client.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use credhub_authn::AuthError;
use serde_json::json;
use tracing::error;

/// An error ready to become an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// No session identity was attached to the request.
    Unauthorized,
    /// The session identity does not own the addressed resource path.
    Forbidden,
    /// The addressed resource does not exist.
    NotFound,
    /// Anything surfaced by the credential core.
    Auth(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => status_message(StatusCode::UNAUTHORIZED, "not logged in"),
            Self::Forbidden => status_message(StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound => status_message(StatusCode::NOT_FOUND, "not found"),
            Self::Auth(err) => auth_response(err),
        }
    }
}

fn status_message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn auth_response(err: AuthError) -> Response {
    match err {
        AuthError::Validation { message } => status_message(StatusCode::BAD_REQUEST, &message),
        AuthError::RateLimited { info } => {
            let mut response = status_message(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
            let retry_secs = info.ms_before_next.div_ceil(1000);
            if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
        AuthError::KeyConflict { .. } => {
            status_message(StatusCode::CONFLICT, "SSH key already registered to another user")
        }
        AuthError::Store(store_err) if store_err.is_not_found() => {
            status_message(StatusCode::NOT_FOUND, "not found")
        }
        other => {
            // Internal failure classes share one opaque response.
            error!(error = %other, "request failed");
            status_message(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
