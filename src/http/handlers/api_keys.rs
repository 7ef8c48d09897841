//! API key administration
//!
//! Creation returns the plain key exactly once; afterwards only metadata
//! is readable.

use crate::http::{AppError, AppState};
use crate::model::{ApiKey, ApiKeyInput, Principal};
use crate::GatewayError;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyPayload {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub scopes: HashSet<String>,
    #[serde(default)]
    pub allowed_servers: HashSet<Uuid>,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub allowed_namespaces: HashSet<Uuid>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub record: ApiKey,
    /// Shown exactly once; never persisted or logged
    pub plain_key: String,
}

/// Keys owned by the calling principal
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ApiKey>>, AppError> {
    let keys = state.repos.api_keys.list_by_user(principal.user_id).await?;
    Ok(Json(keys))
}

/// Mint a key for the calling principal
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateApiKeyPayload>,
) -> Result<(StatusCode, Json<CreatedApiKey>), AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    if let Some(expires_at) = payload.expires_at
        && expires_at <= Utc::now()
    {
        return Err(AppError(GatewayError::validation(
            "expires_at must be in the future",
        )));
    }

    let (record, plain_key) = state
        .repos
        .api_keys
        .create(ApiKeyInput {
            user_id: principal.user_id,
            name: payload.name,
            scopes: payload.scopes,
            allowed_servers: payload.allowed_servers,
            allowed_tools: payload.allowed_tools,
            allowed_namespaces: payload.allowed_namespaces,
            ip_whitelist: payload.ip_whitelist,
            read_only: payload.read_only,
            expires_at: payload.expires_at,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedApiKey { record, plain_key })))
}

/// Revoke one of the caller's keys
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.repos.api_keys.delete(id, principal.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
