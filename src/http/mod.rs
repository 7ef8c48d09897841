//! HTTP server for the gateway
//!
//! Wires the middleware chain (correlation, audit, timeout, recovery,
//! authentication) around the admin CRUD surface and the broker route.

pub mod handlers;
pub mod middleware;

use crate::audit::{AuditQueue, spawn_persister};
use crate::auth::{MemoryPolicy, PolicyEnforcer, PolicyEngine, PrincipalResolver, SessionCodec};
use crate::config::Config;
use crate::proxy::TransportBroker;
use crate::storage::{Repositories, create_repositories};
use crate::visibility::VisibilityFilter;
use crate::{GatewayError, Result};
use axum::{
    Json, Router,
    http::{StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub resolver: PrincipalResolver,
    pub enforcer: PolicyEnforcer,
    pub visibility: VisibilityFilter,
    pub broker: TransportBroker,
    pub audit: AuditQueue,
    pub sessions: SessionCodec,
    pub config: Arc<Config>,
}

impl AppState {
    /// Assemble the state from configuration and a repository bundle
    pub fn new(config: Config, repos: Repositories, policy: Arc<dyn PolicyEngine>) -> Result<Self> {
        let http = config.http();
        let auth = config.auth();

        let scheme = if http.secure { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, http.host, http.port);
        let oauth = crate::auth::oauth::create_validator(auth.oauth.as_ref(), base_url)?;

        let resolver = PrincipalResolver::new(
            repos.users.clone(),
            repos.api_keys.clone(),
            oauth,
            auth.api_key_enabled,
            auth.session_enabled,
        );

        Ok(Self {
            enforcer: PolicyEnforcer::new(policy),
            visibility: VisibilityFilter::new(repos.namespaces.clone()),
            broker: TransportBroker::new(config.upstream()),
            audit: AuditQueue::new(config.audit().queue_capacity),
            sessions: SessionCodec::new(&auth.session_secret),
            resolver,
            repos,
            config: Arc::new(config),
        })
    }
}

/// Error type for HTTP handlers carrying the wire envelope
#[derive(Debug)]
pub struct AppError(pub GatewayError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::ServerNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ServerInactive(_) => StatusCode::BAD_GATEWAY,
            GatewayError::TransportUnsupported(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Protocol { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Storage(crate::error::StorageError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Storage(crate::error::StorageError::Conflict { .. }) => {
                StatusCode::CONFLICT
            }
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.error_code();
        let message = match &self.0 {
            // internals are logged, not leaked
            GatewayError::Storage(e @ crate::error::StorageError::Database(_)) => {
                tracing::error!("storage error: {:?}", e);
                "an internal storage error occurred".to_string()
            }
            GatewayError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        tracing::debug!(code = code, status = %status, message = %message, "request error");

        let body = json!({
            "error": code,
            "message": message,
        });
        let mut response = (status, Json(body)).into_response();
        // the audit middleware picks the message up from here
        response
            .extensions_mut()
            .insert(middleware::ErrorMessage(message));
        response
    }
}

impl<E> From<E> for AppError
where
    E: Into<GatewayError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// 401 with the OAuth discovery challenge attached when applicable
pub(crate) fn unauthorized_response(state: &AppState, err: GatewayError) -> Response {
    let mut response = AppError(err).into_response();
    if response.status() == StatusCode::UNAUTHORIZED && state.resolver.oauth().is_enabled() {
        let challenge =
            crate::auth::oauth::www_authenticate_challenge(&state.resolver.oauth().base_url());
        if let Ok(value) = challenge.parse() {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
    }
    response
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let repos = create_repositories(&config.storage).await?;
    let policy: Arc<dyn PolicyEngine> = Arc::new(MemoryPolicy::with_defaults());
    let state = AppState::new(config, repos, policy)?;

    let http = state.config.http();
    spawn_persister(state.audit.clone(), state.repos.audit.clone());

    let app = build_router(state);

    let addr = format!("{}:{}", http.host, http.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| GatewayError::config(format!("Invalid address {}: {}", addr, e)))?;

    tracing::info!("Starting gateway on {}", socket_addr);

    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| GatewayError::config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Build the router with all endpoints and the middleware chain
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/servers",
            get(handlers::servers::list).post(handlers::servers::create),
        )
        .route("/servers/test-connection", post(handlers::servers::test_connection))
        .route(
            "/servers/{id}",
            get(handlers::servers::get_one)
                .put(handlers::servers::update)
                .delete(handlers::servers::delete),
        )
        .route(
            "/namespaces",
            get(handlers::namespaces::list).post(handlers::namespaces::create),
        )
        .route(
            "/namespaces/{id}",
            get(handlers::namespaces::get_one)
                .put(handlers::namespaces::update)
                .delete(handlers::namespaces::delete),
        )
        .route(
            "/namespaces/{id}/servers/{server_id}",
            post(handlers::namespaces::add_server).delete(handlers::namespaces::remove_server),
        )
        .route(
            "/namespaces/{id}/roles/{role}",
            post(handlers::namespaces::set_role_access)
                .delete(handlers::namespaces::clear_role_access),
        )
        .route(
            "/users",
            get(handlers::users::list).post(handlers::users::create),
        )
        .route(
            "/users/{id}",
            get(handlers::users::get_one)
                .put(handlers::users::update)
                .delete(handlers::users::delete),
        )
        .route(
            "/users/{id}/roles/{role}",
            post(handlers::users::assign_role).delete(handlers::users::remove_role),
        )
        .route(
            "/roles",
            get(handlers::users::list_roles).post(handlers::users::create_role),
        )
        .route("/roles/{name}", axum::routing::delete(handlers::users::delete_role))
        .route(
            "/api-keys",
            get(handlers::api_keys::list).post(handlers::api_keys::create),
        )
        .route("/api-keys/{id}", axum::routing::delete(handlers::api_keys::delete))
        .route("/audit", get(handlers::audit::list))
        .route("/audit/{id}", get(handlers::audit::get_one))
        .route("/analytics", get(handlers::audit::analytics))
        .route("/gateway/{server_id}", any(handlers::gateway::dispatch_root))
        .route(
            "/gateway/{server_id}/{*path}",
            any(handlers::gateway::dispatch),
        );

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::auth::protected_resource_metadata),
        )
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                // outermost: correlation id, security headers, HTTP metrics
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::request_context,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new())
                        .on_response(
                            DefaultOnResponse::new()
                                .level(tracing::Level::INFO)
                                .latency_unit(LatencyUnit::Micros),
                        ),
                )
                .layer(cors_layer(&state))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::audit_capture,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::request_timeout,
                ))
                .layer(axum::middleware::from_fn(middleware::recover_panics))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::authenticate,
                )),
        )
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let http = state.config.http();
    let origins: Vec<axum::http::HeaderValue> = http
        .allowed_origins
        .clone()
        .unwrap_or_else(|| {
            vec![
                format!("http://localhost:{}", http.port),
                format!("http://127.0.0.1:{}", http.port),
            ]
        })
        .into_iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::HeaderName::from_static("x-api-key"),
            axum::http::header::HeaderName::from_static("mcp-session-id"),
            axum::http::header::HeaderName::from_static("mcp-protocol-version"),
        ])
        .allow_credentials(true)
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ready_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> std::result::Result<Json<Value>, AppError> {
    // readiness means the repositories answer
    state
        .repos
        .servers
        .list(&crate::model::ServerFilter::default())
        .await?;
    Ok(Json(json!({
        "status": "ready",
        "audit_queue_depth": state.audit.depth(),
    })))
}

async fn metrics_handler() -> std::result::Result<(StatusCode, String), AppError> {
    let metrics = crate::telemetry::get_metrics()?;
    Ok((StatusCode::OK, metrics))
}

#[cfg(test)]
mod http_test;
