//! The broker route
//!
//! `/api/v1/gateway/:server_id/*` resolves the upstream, applies the
//! visibility filter (non-visible servers answer 404, not 403), and hands
//! the request to the executor matching the server's transport.

use crate::http::{AppError, AppState};
use crate::model::{AccessLevel, McpServer, Principal, Transport};
use crate::proxy::CallReply;
use crate::proxy::rpc::JsonRpcResponse;
use crate::{GatewayError, Result};
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{Value, json};
use uuid::Uuid;

/// Broker entry for the bare `/gateway/:server_id` route
pub async fn dispatch_root(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(server_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, AppError> {
    dispatch_inner(state, principal, server_id, String::new(), method, uri, headers, body).await
}

/// Broker entry for `/gateway/:server_id/*path`
pub async fn dispatch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((server_id, path)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, AppError> {
    let suffix = format!("/{}", path);
    dispatch_inner(state, principal, server_id, suffix, method, uri, headers, body).await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_inner(
    state: AppState,
    principal: Principal,
    server_id: String,
    suffix: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, AppError> {
    // an unparseable id discloses nothing
    let server_id = Uuid::parse_str(&server_id)
        .map_err(|_| GatewayError::ServerNotFound(server_id.clone()))?;

    let server = state
        .repos
        .servers
        .get(server_id)
        .await?
        .ok_or_else(|| GatewayError::ServerNotFound(server_id.to_string()))?;

    // existence of invisible servers is not disclosed either
    let visible = state
        .visibility
        .can_access(&principal, server_id, AccessLevel::Execute)
        .await?;
    if !visible {
        return Err(AppError(GatewayError::ServerNotFound(server_id.to_string())));
    }

    let transport = state.broker.classify(&server)?;
    let query = uri.query();

    let response = match transport {
        Transport::Http => {
            state
                .broker
                .reverse
                .execute(&server, method, &suffix, query, &headers, body)
                .await?
        }
        Transport::Sse => execute_sse(&state, &server, &suffix, &body).await?,
        Transport::StreamableHttp => {
            execute_streamable(&state, &server, &suffix, method, query, &headers, body).await?
        }
        Transport::Stdio => {
            return Err(AppError(GatewayError::TransportUnsupported(
                "stdio servers cannot be proxied".to_string(),
            )));
        }
    };

    Ok(response)
}

async fn execute_sse(
    state: &AppState,
    server: &McpServer,
    suffix: &str,
    body: &Bytes,
) -> Result<Response> {
    let call = RpcCall::from_request(suffix, body)?;
    let request = crate::proxy::rpc::JsonRpcRequest::new(call.method.clone(), call.params.clone());
    let response = state.broker.sse.send(server, &request).await?;
    Ok(reply_response(response, call.client_id))
}

async fn execute_streamable(
    state: &AppState,
    server: &McpServer,
    suffix: &str,
    method: Method,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    // clients that manage their own MCP session are tunnelled verbatim
    if headers.contains_key(crate::constants::MCP_SESSION_ID_HEADER) {
        return state
            .broker
            .reverse
            .execute(server, method, suffix, query, headers, body)
            .await;
    }

    // explicit session teardown
    if method == Method::DELETE && (suffix.is_empty() || suffix == "/") {
        state.broker.streamable.terminate(server).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let call = RpcCall::from_request(suffix, &body)?;

    // client notifications carry no id and expect no reply
    if call.client_id.is_none() && call.method.starts_with("notifications/") {
        state.broker.streamable.ensure_session(server).await?;
        state.broker.streamable.notify(server, &call.method).await?;
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    match state
        .broker
        .streamable
        .call_raw(server, &call.method, call.params.clone())
        .await?
    {
        CallReply::Response(response) => Ok(reply_response(response, call.client_id)),
        CallReply::Accepted => Ok(StatusCode::ACCEPTED.into_response()),
    }
}

/// A JSON-RPC call derived from the inbound request
///
/// POST bodies carrying a full envelope win; otherwise the path suffix
/// names the method (`GET .../tools/list` calls `tools/list`) and a bare
/// JSON body becomes the params.
struct RpcCall {
    method: String,
    params: Option<Value>,
    client_id: Option<Value>,
}

impl RpcCall {
    fn from_request(suffix: &str, body: &Bytes) -> Result<Self> {
        let parsed: Option<Value> = if body.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(body)
                    .map_err(|e| GatewayError::validation(format!("invalid JSON body: {}", e)))?,
            )
        };

        if let Some(envelope) = parsed
            .as_ref()
            .filter(|v| v.get("method").and_then(|m| m.as_str()).is_some())
        {
            return Ok(Self {
                method: envelope["method"].as_str().unwrap_or_default().to_string(),
                params: envelope.get("params").cloned(),
                client_id: envelope.get("id").cloned(),
            });
        }

        let method = suffix.trim_matches('/').to_string();
        if method.is_empty() {
            return Err(GatewayError::validation(
                "request carries neither a JSON-RPC envelope nor a method path",
            ));
        }
        Ok(Self {
            method,
            params: parsed,
            client_id: None,
        })
    }
}

/// Render an upstream JSON-RPC reply for the client
///
/// Results are unwrapped; error objects pass through as a 200 RPC error
/// envelope keyed by the client's own id.
fn reply_response(response: JsonRpcResponse, client_id: Option<Value>) -> Response {
    let id = client_id.unwrap_or_else(|| {
        response
            .id
            .map(|id| json!(id))
            .unwrap_or(Value::Null)
    });
    match response.error {
        Some(error) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        }))
        .into_response(),
        None => Json(response.result.unwrap_or(Value::Null)).into_response(),
    }
}

