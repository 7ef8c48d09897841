//! Middleware chain for the gateway
//!
//! Correlation and security headers, the authentication pipeline
//! (extract, resolve, scope-guard, policy), the request deadline with
//! streaming exemptions, panic recovery, and audit capture.

use super::{AppError, AppState, unauthorized_response};
use crate::auth::{credentials, scope};
use crate::constants::{AUDIT_BODY_CAP_BYTES, GATEWAY_PREFIX, REQUEST_ID_HEADER};
use crate::model::{AuditRecord, Principal};
use crate::utils::{client_ip, normalize_path};
use crate::{GatewayError, telemetry};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Correlation id assigned to every request
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Error message propagated from the error envelope to the audit record
#[derive(Clone, Debug)]
pub struct ErrorMessage(pub String);

/// Outermost middleware: request id, security headers, HTTP metrics
pub async fn request_context(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(|v| v.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let method = req.method().clone();
    let normalized = normalize_path(req.uri().path());
    let started = Instant::now();

    let mut response = next.run(req).await;

    telemetry::record_http_request(&normalized, method.as_str(), response.status().as_u16());
    telemetry::record_http_duration(
        &normalized,
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    if state.config.http().secure {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }

    response
}

/// The authentication pipeline: extract, resolve, scope-guard, policy
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/v1") {
        return next.run(req).await;
    }

    let credential = credentials::extract(req.headers(), &state.sessions);
    let principal = match state.resolver.resolve(credential).await {
        Ok(principal) => principal,
        Err(err) => return unauthorized_response(&state, err),
    };

    // API key restrictions
    let (required_scopes, server_id, namespace_id) = scope_requirements(&path, req.method());
    let scopes: Vec<&str> = required_scopes.iter().map(|s| s.as_str()).collect();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(peer, req.headers(), state.config.http().trust_proxy);
    if let Err(err) = scope::enforce_request(
        &principal,
        &scopes,
        req.method(),
        ip,
        server_id,
        namespace_id,
    ) {
        return AppError(err).into_response();
    }

    // role-based policy on the normalized route
    if !path.starts_with("/api/v1/auth/") {
        let object = normalize_path(&path);
        if let Err(err) = state
            .enforcer
            .enforce(&principal, &object, req.method().as_str())
            .await
        {
            return AppError(err).into_response();
        }
    }

    req.extensions_mut().insert(principal.clone());
    let mut response = next.run(req).await;
    // the audit middleware runs outside of here and reads the principal
    // off the response
    response.extensions_mut().insert(principal);
    response
}

/// Per-request deadline with exemptions for streaming traffic
///
/// Gateway paths use the per-upstream timeout inside the executors;
/// requests negotiating an SSE stream are never cut.
pub async fn request_timeout(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let exempt = req.uri().path().contains("/gateway/")
        || req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"));

    if exempt {
        return next.run(req).await;
    }

    let deadline = Duration::from_secs(state.config.upstream().default_timeout_seconds);
    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => AppError(GatewayError::Timeout).into_response(),
    }
}

/// Catch panics from anything further in and answer 500
pub async fn recover_panics(req: Request, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(request_id = %request_id, "handler panicked: {}", message);
            AppError(GatewayError::internal("handler panicked")).into_response()
        }
    }
}

/// Observe the whole exchange and enqueue an audit record
///
/// Request bodies are captured only when small enough to buffer without
/// disturbing the handler; response bodies only when they are JSON with a
/// known small length. The enqueue itself never blocks.
pub async fn audit_capture(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !path.starts_with("/api/v1") {
        return next.run(req).await;
    }

    let started = Instant::now();
    let method = req.method().clone();
    let query = req.uri().query().map(parse_query);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(peer, req.headers(), state.config.http().trust_proxy);
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let server_id = gateway_server_id(&path);

    let (req, request_body) = capture_request_body(req).await;

    let response = next.run(req).await;

    let user_id = response
        .extensions()
        .get::<Principal>()
        .map(|p| p.user_id);
    let error_message = response
        .extensions()
        .get::<ErrorMessage>()
        .map(|e| e.0.clone());
    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as i64;

    let (response, response_body) = capture_response_body(response).await;

    state.audit.enqueue(AuditRecord {
        id: Uuid::new_v4(),
        request_id,
        user_id,
        server_id,
        method: method.to_string(),
        path,
        query,
        request_body,
        response_status: status,
        response_body,
        latency_ms,
        client_ip: ip.map(|ip| ip.to_string()),
        user_agent,
        error_message,
        created_at: Utc::now(),
    });

    response
}

/// Buffer and restore the request body when it is small enough to audit
async fn capture_request_body(req: Request) -> (Request, Option<Value>) {
    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match content_length {
        Some(len) if len > 0 && len <= AUDIT_BODY_CAP_BYTES => {
            let (parts, body) = req.into_parts();
            match axum::body::to_bytes(body, AUDIT_BODY_CAP_BYTES).await {
                Ok(bytes) => {
                    let captured = serde_json::from_slice(&bytes).ok();
                    (Request::from_parts(parts, Body::from(bytes)), captured)
                }
                Err(_) => (Request::from_parts(parts, Body::empty()), None),
            }
        }
        _ => (req, None),
    }
}

/// Buffer and restore the response body when it is small JSON
///
/// Streaming responses have no declared length and pass through
/// untouched.
async fn capture_response_body(response: Response) -> (Response, Option<Value>) {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let content_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match content_length {
        Some(len) if is_json && len > 0 && len <= AUDIT_BODY_CAP_BYTES => {
            let (parts, body) = response.into_parts();
            match axum::body::to_bytes(body, AUDIT_BODY_CAP_BYTES).await {
                Ok(bytes) => {
                    let captured = serde_json::from_slice(&bytes).ok();
                    (Response::from_parts(parts, Body::from(bytes)), captured)
                }
                Err(_) => (Response::from_parts(parts, Body::empty()), None),
            }
        }
        _ => (response, None),
    }
}

/// Scope requirements and path-parameter ids derived from the route
///
/// Returns the acceptable scopes (any-of), the `:server_id` and the
/// `:namespace_id` path parameters where the route carries them.
pub(crate) fn scope_requirements(path: &str, method: &Method) -> (Vec<String>, Option<Uuid>, Option<Uuid>) {
    let is_read = scope::is_read_method(method);
    let segments: Vec<&str> = path
        .trim_start_matches("/api/v1")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let id_at = |index: usize| segments.get(index).and_then(|s| Uuid::parse_str(s).ok());

    match segments.first().copied() {
        Some("gateway") => (
            vec![scope::read_scope("servers"), "servers:execute".to_string()],
            id_at(1),
            None,
        ),
        Some("servers") => {
            let needed = if is_read {
                scope::read_scope("servers")
            } else {
                scope::write_scope("servers")
            };
            (vec![needed], id_at(1), None)
        }
        Some("namespaces") => {
            let needed = if is_read {
                scope::read_scope("namespaces")
            } else {
                scope::write_scope("namespaces")
            };
            (vec![needed], None, id_at(1))
        }
        Some(resource @ ("users" | "roles" | "api-keys")) => {
            let needed = if is_read {
                scope::read_scope(resource)
            } else {
                scope::write_scope(resource)
            };
            (vec![needed], None, None)
        }
        Some("audit" | "analytics") => (vec![scope::read_scope("audit")], None, None),
        _ => (Vec::new(), None, None),
    }
}

/// The `:server_id` parameter of a broker route
pub(crate) fn gateway_server_id(path: &str) -> Option<Uuid> {
    let rest = path.strip_prefix(GATEWAY_PREFIX)?.strip_prefix('/')?;
    let id = rest.split('/').next()?;
    Uuid::parse_str(id).ok()
}

/// Decode a query string into a JSON object
pub(crate) fn parse_query(query: &str) -> Value {
    let map: serde_json::Map<String, Value> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    Value::Object(map)
}

