//! User and role administration

use crate::http::{AppError, AppState};
use crate::model::{Role, User};
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
pub struct CreateUserPayload {
    #[validate(email)]
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub roles: HashSet<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserPayload {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: User,
    pub roles: HashSet<String>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = state.repos.users.list().await?;
    let mut responses = Vec::with_capacity(users.len());
    for user in users {
        let roles = state.repos.users.roles_of(user.id).await?;
        responses.push(UserResponse { user, roles });
    }
    Ok(Json(responses))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .repos
        .users
        .by_id(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("user", id.to_string()))?;
    let roles = state.repos.users.roles_of(id).await?;
    Ok(Json(UserResponse { user, roles }))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserPayload>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let user = User {
        id: Uuid::new_v4(),
        email: payload.email,
        name: payload.name,
        is_active: true,
        provider: None,
        external_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.repos.users.create(&user).await?;
    for role in &payload.roles {
        state.repos.users.assign_role(user.id, role).await?;
    }
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user,
            roles: payload.roles,
        }),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<User>, AppError> {
    let mut user = state
        .repos
        .users
        .by_id(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("user", id.to_string()))?;
    if let Some(name) = payload.name {
        user.name = Some(name);
    }
    if let Some(is_active) = payload.is_active {
        user.is_active = is_active;
    }
    user.updated_at = Utc::now();
    state.repos.users.update(&user).await?;
    Ok(Json(user))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .users
        .by_id(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("user", id.to_string()))?;
    state.repos.users.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_role(
    State(state): State<AppState>,
    Path((id, role)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .users
        .by_id(id)
        .await?
        .ok_or_else(|| GatewayError::not_found("user", id.to_string()))?;
    state.repos.users.assign_role(id, &role).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path((id, role)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    state.repos.users.remove_role(id, &role).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRolePayload {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub description: Option<String>,
}

pub async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, AppError> {
    Ok(Json(state.repos.users.list_roles().await?))
}

pub async fn create_role(
    State(state): State<AppState>,
    Json(payload): Json<CreateRolePayload>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let role = Role {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
        created_at: Utc::now(),
    };
    state.repos.users.create_role(&role).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.repos.users.delete_role(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
