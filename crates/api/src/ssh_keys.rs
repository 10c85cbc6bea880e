//! SSH key routes.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use credhub_authn::{
    KeyCreation, origin_rate_key, service_origin,
    ssh_key::CreateKey,
};
use credhub_store::SshKeyRecord;
use serde::Serialize;
use serde_json::json;

use crate::{
    auth::{ClientAddr, SessionUser, origin_method, request_meta, require_owner},
    error::ApiError,
    state::AppState,
};

/// One SSH key as exposed over HTTP.
///
/// Field casing is inherited from the stored documents (snake_case)
/// except `userId`, which older consumers already read in camelCase.
#[derive(Debug, Serialize)]
pub struct SshKeyResponse {
    /// Store-assigned identity.
    pub id: String,
    /// Human label.
    pub key_name: String,
    /// OpenSSH wire text.
    pub public_key: String,
    /// Canonical fingerprint.
    pub fingerprint: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Owning user.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Owner's email, when the directory resolves it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Owner's display name, when the directory resolves it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<SshKeyRecord> for SshKeyResponse {
    fn from(record: SshKeyRecord) -> Self {
        Self {
            id: record.id.as_str().to_string(),
            key_name: record.key_name,
            public_key: record.public_key,
            fingerprint: record.fingerprint,
            created_at: record.created_at,
            updated_at: record.updated_at,
            user_id: record.user_id.as_str().to_string(),
            email: None,
            display_name: None,
        }
    }
}

/// `GET /users/{user_id}/ssh-keys`
pub async fn list_keys(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    session: Option<Extension<SessionUser>>,
) -> Result<Json<Vec<SshKeyResponse>>, ApiError> {
    require_owner(session.as_deref(), &user_id)?;
    let keys = state.keys.list(&user_id).await?;
    Ok(Json(keys.into_iter().map(SshKeyResponse::from).collect()))
}

/// `POST /users/{user_id}/ssh-keys`
///
/// 201 when this caller created the key; 200 when the same user already
/// held it (identical concurrent submissions converge); 409 when another
/// user holds it.
pub async fn create_key(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    session: Option<Extension<SessionUser>>,
    Json(body): Json<CreateKey>,
) -> Result<Response, ApiError> {
    let user_id = require_owner(session.as_deref(), &user_id)?;
    let outcome = state.keys.create(&user_id, body).await?;

    let status = match &outcome {
        KeyCreation::Created(_) => StatusCode::CREATED,
        KeyCreation::AlreadyOwned(_) => StatusCode::OK,
    };
    let mut response = SshKeyResponse::from(outcome.record().clone());

    // Read-time join; display fields are decoration, not contract.
    if let Ok(Some(display)) = state.directory.display(&user_id).await {
        response.email = Some(display.email);
        response.display_name = display.display_name;
    }

    Ok((status, Json(response)).into_response())
}

/// `DELETE /users/{user_id}/ssh-keys/{key_id}`
pub async fn remove_key(
    State(state): State<AppState>,
    Path((user_id, key_id)): Path<(String, String)>,
    session: Option<Extension<SessionUser>>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_owner(session.as_deref(), &user_id)?;
    let Ok(key_id) = credhub_store::Id::parse(&key_id) else {
        return Err(ApiError::NotFound);
    };
    if state.keys.remove(&user_id, &key_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

/// `GET /ssh-keys/{fingerprint}`
///
/// Service-origin authenticated owner lookup.
pub async fn lookup_key(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    headers: HeaderMap,
    client_addr: ClientAddr,
) -> Result<Response, ApiError> {
    let meta = request_meta(&headers, client_addr);
    let origin = service_origin(&meta, &state.origin);
    state
        .fingerprint_limiter
        .consume(&origin_rate_key(origin.as_deref()), 1, origin_method(origin.as_deref()))
        .await?;

    match state.keys.lookup_owner(&fingerprint).await? {
        Some(user_id) => Ok(Json(json!({ "userId": user_id.as_str() })).into_response()),
        None => Err(ApiError::NotFound),
    }
}
