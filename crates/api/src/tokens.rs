//! Personal access token routes.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use credhub_authn::{
    Introspection, origin_rate_key, service_origin,
    rate_limit::Method,
    token::CreateToken,
};
use credhub_store::AccessTokenRecord;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::{ClientAddr, SessionUser, origin_method, request_meta, require_owner},
    error::ApiError,
    state::AppState,
};

/// Creation response; the only place the plaintext ever appears.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTokenResponse {
    /// Store-assigned identity.
    pub id: String,
    /// The plaintext secret, shown exactly once.
    pub token: String,
    /// The hash prefix, for UI display.
    pub access_token_partial: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry carried over from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// One row of the token list; never includes the hash or plaintext.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    /// Store-assigned identity.
    pub id: String,
    /// Human label.
    pub label: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Whether the token is usable.
    pub active: bool,
    /// The display partial.
    pub hash_prefix: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optional expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful introspection, best-effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<AccessTokenRecord> for TokenSummary {
    fn from(record: AccessTokenRecord) -> Self {
        Self {
            id: record.id.as_str().to_string(),
            label: record.label,
            scopes: record.scopes,
            active: record.active,
            hash_prefix: record.hash_prefix,
            created_at: record.created_at,
            expires_at: record.expires_at,
            last_used_at: record.last_used_at,
        }
    }
}

/// Introspection request body.
#[derive(Debug, Deserialize)]
pub struct IntrospectBody {
    /// The plaintext secret to resolve.
    pub token: Option<String>,
}

/// `POST /users/{user_id}/tokens`
pub async fn create_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    session: Option<Extension<SessionUser>>,
    Json(body): Json<CreateToken>,
) -> Result<Response, ApiError> {
    let user_id = require_owner(session.as_deref(), &user_id)?;

    state
        .create_limiter
        .consume(&format!("user:{user_id}"), 1, Method::Unknown)
        .await?;

    let created = state.tokens.create(&user_id, body).await?;
    let response = CreatedTokenResponse {
        id: created.id.as_str().to_string(),
        token: created.token,
        access_token_partial: created.hash_prefix,
        created_at: created.created_at,
        expires_at: created.expires_at,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// `GET /users/{user_id}/tokens`
pub async fn list_tokens(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    session: Option<Extension<SessionUser>>,
) -> Result<Json<Vec<TokenSummary>>, ApiError> {
    require_owner(session.as_deref(), &user_id)?;
    let tokens = state.tokens.list(&user_id).await?;
    Ok(Json(tokens.into_iter().map(TokenSummary::from).collect()))
}

/// `DELETE /users/{user_id}/tokens/{token_id}`
pub async fn revoke_token(
    State(state): State<AppState>,
    Path((user_id, token_id)): Path<(String, String)>,
    session: Option<Extension<SessionUser>>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_owner(session.as_deref(), &user_id)?;
    let Ok(token_id) = credhub_store::Id::parse(&token_id) else {
        // A malformed id cannot name an existing token.
        return Err(ApiError::NotFound);
    };
    if state.tokens.revoke(&user_id, &token_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

/// `POST /tokens/introspect`
///
/// Service-origin authenticated: the caller is identified for rate
/// limiting, not authorized per-user.
pub async fn introspect_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    client_addr: ClientAddr,
    Json(body): Json<IntrospectBody>,
) -> Result<Json<Introspection>, ApiError> {
    let meta = request_meta(&headers, client_addr);
    let origin = service_origin(&meta, &state.origin);
    state
        .introspect_limiter
        .consume(&origin_rate_key(origin.as_deref()), 1, origin_method(origin.as_deref()))
        .await?;

    let token = body
        .token
        .ok_or_else(|| credhub_authn::AuthError::validation("missing token"))?;
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(credhub_authn::AuthError::validation("malformed token").into());
    }

    Ok(Json(state.tokens.introspect(&token).await?))
}

/// Not-found responses for this router share one JSON shape.
pub async fn fallback() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}
