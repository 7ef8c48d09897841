//! Server registry CRUD and the connection probe

use crate::http::{AppError, AppState};
use crate::model::{
    AccessLevel, McpServer, Principal, ServerFilter, ServerHealth, Transport, UpstreamAuth,
};
use crate::proxy::effective_transport;
use crate::GatewayError;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ServerPayload {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(url)]
    pub url: String,
    pub transport: Option<Transport>,
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub auth_type: UpstreamAuth,
    pub auth_config: Option<Value>,
    #[validate(range(min = 1, max = 3600))]
    pub timeout_seconds: Option<u64>,
    #[validate(range(min = 1, max = 1024))]
    pub max_connections: Option<usize>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ServerResponse {
    #[serde(flatten)]
    pub server: McpServer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<ServerHealth>,
}

/// List servers visible to the principal
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<ServerFilter>,
) -> Result<Json<Vec<McpServer>>, AppError> {
    let accessible = state
        .visibility
        .accessible_ids(&principal, AccessLevel::View)
        .await?;
    let servers = state
        .repos
        .servers
        .list_for_user(&filter, accessible.as_ref())
        .await?;
    Ok(Json(servers))
}

/// Fetch one server with its last health probe
pub async fn get_one(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServerResponse>, AppError> {
    if !state
        .visibility
        .can_access(&principal, id, AccessLevel::View)
        .await?
    {
        return Err(AppError(GatewayError::ServerNotFound(id.to_string())));
    }
    let server = state
        .repos
        .servers
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::ServerNotFound(id.to_string()))?;
    let health = state.repos.servers.health(id).await?;
    Ok(Json(ServerResponse { server, health }))
}

/// Register a server
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<ServerPayload>,
) -> Result<(StatusCode, Json<McpServer>), AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let server = McpServer {
        id: Uuid::new_v4(),
        name: payload.name,
        url: payload.url,
        transport: payload.transport,
        protocol_version: payload.protocol_version,
        auth_type: payload.auth_type,
        auth_config: payload.auth_config,
        timeout_seconds: payload.timeout_seconds,
        max_connections: payload.max_connections,
        is_active: payload.is_active,
        allowed_tools: payload.allowed_tools,
        tags: payload.tags,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.repos.servers.create(&server).await?;
    Ok((StatusCode::CREATED, Json(server)))
}

/// Update a server
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ServerPayload>,
) -> Result<Json<McpServer>, AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let existing = state
        .repos
        .servers
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::ServerNotFound(id.to_string()))?;

    let server = McpServer {
        id,
        name: payload.name,
        url: payload.url,
        transport: payload.transport,
        protocol_version: payload.protocol_version,
        auth_type: payload.auth_type,
        auth_config: payload.auth_config,
        timeout_seconds: payload.timeout_seconds,
        max_connections: payload.max_connections,
        is_active: payload.is_active,
        allowed_tools: payload.allowed_tools,
        tags: payload.tags,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    state.repos.servers.update(&server).await?;
    Ok(Json(server))
}

/// Delete a server
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .repos
        .servers
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::ServerNotFound(id.to_string()))?;
    state.repos.servers.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct TestConnectionRequest {
    /// Probe a registered server by id ...
    pub server_id: Option<Uuid>,
    /// ... or an ad-hoc configuration before registering it
    #[validate(url)]
    pub url: Option<String>,
    pub transport: Option<Transport>,
    #[serde(default)]
    pub auth_type: UpstreamAuth,
    pub auth_config: Option<Value>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub success: bool,
    pub tools: Vec<Value>,
    pub tool_count: usize,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Dry-run a `tools/list` probe against an unregistered upstream
pub async fn test_connection(
    State(state): State<AppState>,
    Json(payload): Json<TestConnectionRequest>,
) -> Result<Json<TestConnectionResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| GatewayError::validation(e.to_string()))?;

    let probe = match (payload.server_id, payload.url) {
        (Some(id), _) => state
            .repos
            .servers
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::ServerNotFound(id.to_string()))?,
        (None, Some(url)) => McpServer {
            id: Uuid::new_v4(),
            name: format!("probe-{}", Uuid::new_v4()),
            url,
            transport: payload.transport,
            protocol_version: None,
            auth_type: payload.auth_type,
            auth_config: payload.auth_config,
            timeout_seconds: payload.timeout_seconds,
            max_connections: Some(1),
            is_active: true,
            allowed_tools: HashSet::new(),
            tags: HashSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        (None, None) => {
            return Err(AppError(GatewayError::validation(
                "either server_id or url is required",
            )));
        }
    };

    let started = Instant::now();
    let result = probe_tools(&state, &probe).await;
    let response_time_ms = started.elapsed().as_millis() as u64;

    // the probe session is throwaway
    if effective_transport(&probe) == Transport::StreamableHttp {
        let _ = state.broker.streamable.terminate(&probe).await;
    }

    // registered servers get their health row refreshed
    if payload.server_id.is_some() {
        let health = ServerHealth {
            server_id: probe.id,
            healthy: result.is_ok(),
            checked_at: Utc::now(),
            response_time_ms: Some(response_time_ms),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        state.repos.servers.set_health(&health).await?;
    }

    let response = match result {
        Ok(tools) => TestConnectionResponse {
            success: true,
            tool_count: tools.len(),
            tools,
            response_time_ms,
            error_message: None,
        },
        Err(e) => TestConnectionResponse {
            success: false,
            tools: Vec::new(),
            tool_count: 0,
            response_time_ms,
            error_message: Some(e.to_string()),
        },
    };
    Ok(Json(response))
}

async fn probe_tools(state: &AppState, probe: &McpServer) -> crate::Result<Vec<Value>> {
    let result = match effective_transport(probe) {
        Transport::StreamableHttp => {
            state
                .broker
                .streamable
                .call(probe, "tools/list", None)
                .await?
        }
        Transport::Sse => state.broker.sse.call(probe, "tools/list", None).await?,
        Transport::Http | Transport::Stdio => {
            return Err(GatewayError::TransportUnsupported(
                "connection probing requires an MCP transport".to_string(),
            ));
        }
    };

    Ok(result
        .get("tools")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default())
}
