//! Namespace CRUD, membership, and role grants

use crate::http::{AppError, AppState};
use crate::model::{AccessLevel, Namespace, NamespaceGrant};
use crate::GatewayError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct NamespacePayload {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub members: HashSet<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct NamespaceResponse {
    #[serde(flatten)]
    pub namespace: Namespace,
    pub grants: Vec<NamespaceGrant>,
}

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<Namespace>>, AppError> {
    Ok(Json(state.repos.namespaces.list().await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NamespaceResponse>, AppError> {
    let namespace = state
        .repos
        .namespaces
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("namespace", id.to_string()))?;
    let grants = state.repos.namespaces.role_access(id).await?;
    Ok(Json(NamespaceResponse { namespace, grants }))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<NamespacePayload>,
) -> Result<(StatusCode, Json<Namespace>), AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let namespace = Namespace {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
        members: payload.members,
        created_at: Utc::now(),
    };
    state.repos.namespaces.create(&namespace).await?;
    Ok((StatusCode::CREATED, Json(namespace)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NamespacePayload>,
) -> Result<Json<Namespace>, AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let mut namespace = state
        .repos
        .namespaces
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("namespace", id.to_string()))?;
    namespace.name = payload.name;
    namespace.description = payload.description;
    state.repos.namespaces.update(&namespace).await?;
    Ok(Json(namespace))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .namespaces
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("namespace", id.to_string()))?;
    state.repos.namespaces.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_server(
    State(state): State<AppState>,
    Path((id, server_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .servers
        .get(server_id)
        .await?
        .ok_or_else(|| GatewayError::ServerNotFound(server_id.to_string()))?;
    state.repos.namespaces.add_server(id, server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_server(
    State(state): State<AppState>,
    Path((id, server_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.repos.namespaces.remove_server(id, server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct GrantPayload {
    pub level: AccessLevel,
}

pub async fn set_role_access(
    State(state): State<AppState>,
    Path((id, role)): Path<(Uuid, String)>,
    Json(payload): Json<GrantPayload>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .namespaces
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("namespace", id.to_string()))?;
    state
        .repos
        .namespaces
        .set_role_access(id, &role, Some(payload.level))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_role_access(
    State(state): State<AppState>,
    Path((id, role)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .namespaces
        .set_role_access(id, &role, None)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
