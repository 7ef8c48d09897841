//! Streamable HTTP executor (MCP 2025-11-25)
//!
//! Owns the per-upstream MCP session table for the lifetime of the
//! process: `initialize` on first use, session-id header exchange on
//! every call, re-initialization on 404, and explicit DELETE termination.
//! Re-initialization is singleflighted per upstream so concurrent expiry
//! never creates two sessions for the same server.

use super::rpc::{JsonRpcRequest, JsonRpcResponse, notification};
use super::{ClientPool, inject_upstream_auth, read_last_sse_event};
use crate::config::UpstreamConfig;
use crate::constants::{
    MCP_CLIENT_NAME, MCP_PROTOCOL_VERSION, MCP_PROTOCOL_VERSION_HEADER, MCP_SESSION_ID_HEADER,
};
use crate::model::McpServer;
use crate::telemetry::{self, InFlightGuard};
use crate::{GatewayError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Conversational state with one upstream
#[derive(Debug, Clone)]
pub struct McpSession {
    pub upstream_id: Uuid,
    /// Issued by the upstream; absent for servers that run sessionless
    pub session_id: Option<String>,
    pub initialized: bool,
    pub protocol_version: String,
    pub last_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reply surfaced to gateway callers
pub enum CallReply {
    /// A full JSON-RPC reply, result or error
    Response(JsonRpcResponse),
    /// 202 accepted (notifications)
    Accepted,
}

/// Outcome of one POST against the MCP endpoint
enum PostOutcome {
    Reply {
        response: JsonRpcResponse,
        session_id: Option<String>,
        last_event_id: Option<String>,
    },
    Accepted {
        session_id: Option<String>,
    },
    SessionExpired,
    BadRequest(String),
    Failed {
        status: u16,
        body: String,
    },
}

/// Session-managed JSON-RPC toward streamable HTTP upstreams
pub struct StreamableHttpExecutor {
    pool: ClientPool,
    /// Read-mostly session table; no lock is held across I/O
    sessions: RwLock<HashMap<Uuid, McpSession>>,
    /// Per-upstream singleflight for (re)initialization
    init_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
}

impl StreamableHttpExecutor {
    pub fn new(defaults: UpstreamConfig) -> Self {
        Self {
            pool: ClientPool::new(defaults),
            sessions: RwLock::new(HashMap::new()),
            init_locks: DashMap::new(),
        }
    }

    /// Current session for an upstream, if any
    pub fn get_session(&self, upstream_id: Uuid) -> Option<McpSession> {
        self.sessions.read().get(&upstream_id).cloned()
    }

    /// Issue a JSON-RPC call and unwrap the result value
    ///
    /// JSON-RPC error objects surface as protocol errors here; use
    /// [`call_raw`](Self::call_raw) to pass them through instead.
    pub async fn call(&self, server: &McpServer, method: &str, params: Option<Value>) -> Result<Value> {
        match self.call_raw(server, method, params).await? {
            CallReply::Response(response) => response.into_result(),
            CallReply::Accepted => Ok(Value::Null),
        }
    }

    /// Issue a JSON-RPC call, initializing or re-initializing as needed
    ///
    /// A 404 from the upstream means the session expired: the session is
    /// cleared, `initialize` re-runs (singleflighted), and the original
    /// call is retried exactly once. The reply envelope comes back
    /// verbatim, including upstream `error` objects.
    pub async fn call_raw(
        &self,
        server: &McpServer,
        method: &str,
        params: Option<Value>,
    ) -> Result<CallReply> {
        self.ensure_session(server).await?;

        let request = JsonRpcRequest::new(method, params);
        match self.post_request(server, &request).await? {
            PostOutcome::Reply { response, .. } => Ok(CallReply::Response(response)),
            PostOutcome::Accepted { session_id } => {
                self.capture_session_id(server.id, session_id);
                Ok(CallReply::Accepted)
            }
            PostOutcome::SessionExpired => {
                tracing::debug!(server = %server.name, "MCP session expired, re-initializing");
                self.clear_session(server.id);
                self.ensure_session(server).await?;

                // one retry of the original call, then give up
                match self.post_request(server, &request).await? {
                    PostOutcome::Reply { response, .. } => Ok(CallReply::Response(response)),
                    PostOutcome::Accepted { session_id } => {
                        self.capture_session_id(server.id, session_id);
                        Ok(CallReply::Accepted)
                    }
                    PostOutcome::SessionExpired => Err(GatewayError::upstream(
                        "upstream expired the session immediately after re-initialization",
                    )),
                    PostOutcome::BadRequest(body) => {
                        Err(GatewayError::upstream(format!("invalid session: {}", body)))
                    }
                    PostOutcome::Failed { status, body } => {
                        Err(GatewayError::Upstream(crate::error::UpstreamError::Status {
                            status,
                            body,
                        }))
                    }
                }
            }
            PostOutcome::BadRequest(body) => {
                Err(GatewayError::upstream(format!("invalid session: {}", body)))
            }
            PostOutcome::Failed { status, body } => {
                Err(GatewayError::Upstream(crate::error::UpstreamError::Status {
                    status,
                    body,
                }))
            }
        }
    }

    /// Send a notification (fire semantics, 202 expected)
    pub async fn notify(&self, server: &McpServer, method: &str) -> Result<()> {
        let session_id = self.session_id_of(server.id);
        self.post_value(server, &notification(method), session_id.as_deref())
            .await?;
        Ok(())
    }

    /// Make sure an initialized session exists for the upstream
    ///
    /// Concurrent callers coalesce on a per-upstream lock; the winner runs
    /// the handshake, everyone else observes the stored session.
    pub async fn ensure_session(&self, server: &McpServer) -> Result<()> {
        if self
            .sessions
            .read()
            .get(&server.id)
            .is_some_and(|s| s.initialized)
        {
            return Ok(());
        }

        let lock = self
            .init_locks
            .entry(server.id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // the winner may have initialized while we waited
        if self
            .sessions
            .read()
            .get(&server.id)
            .is_some_and(|s| s.initialized)
        {
            return Ok(());
        }

        self.initialize(server).await
    }

    /// Terminate the upstream session with a DELETE
    ///
    /// 405 means the server does not allow client-initiated termination
    /// and is accepted; the local session entry is dropped either way.
    pub async fn terminate(&self, server: &McpServer) -> Result<()> {
        let session_id = self.session_id_of(server.id);
        self.clear_session(server.id);

        let Some(session_id) = session_id else {
            return Ok(());
        };

        let client = self.pool.client_for(server)?;
        let mut builder = client
            .delete(&server.url)
            .header(MCP_PROTOCOL_VERSION_HEADER, MCP_PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, &session_id)
            .timeout(self.pool.timeout_for(server));
        builder = inject_upstream_auth(builder, server);

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::upstream(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 405 {
            return Ok(());
        }
        Err(GatewayError::Upstream(crate::error::UpstreamError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }))
    }

    async fn initialize(&self, server: &McpServer) -> Result<()> {
        let request = JsonRpcRequest::new(
            "initialize",
            Some(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "clientInfo": {
                    "name": MCP_CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {},
            })),
        );

        let body = serde_json::to_value(&request)?;
        let outcome = self.post_value(server, &body, None).await?;

        let (session_id, protocol_version) = match outcome {
            PostOutcome::Reply {
                response,
                session_id,
                ..
            } => {
                let result = response.into_result()?;
                let version = result
                    .get("protocolVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or(MCP_PROTOCOL_VERSION)
                    .to_string();
                (session_id, version)
            }
            // some servers acknowledge initialize with a bare 202 and
            // only hand out the session id there
            PostOutcome::Accepted { session_id } => {
                (session_id, MCP_PROTOCOL_VERSION.to_string())
            }
            PostOutcome::SessionExpired => {
                return Err(GatewayError::upstream("upstream rejected initialize with 404"));
            }
            PostOutcome::BadRequest(body) => {
                return Err(GatewayError::upstream(format!("initialize rejected: {}", body)));
            }
            PostOutcome::Failed { status, body } => {
                return Err(GatewayError::Upstream(crate::error::UpstreamError::Status {
                    status,
                    body,
                }));
            }
        };

        self.sessions.write().insert(
            server.id,
            McpSession {
                upstream_id: server.id,
                session_id,
                initialized: true,
                protocol_version,
                last_event_id: None,
                created_at: Utc::now(),
            },
        );

        tracing::info!(server = %server.name, "initialized MCP session");

        // the initialized notification must not abort the handshake
        let session_id = self.session_id_of(server.id);
        match self
            .post_value(server, &notification("notifications/initialized"), session_id.as_deref())
            .await
        {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(server = %server.name, "initialized notification failed: {}", e);
            }
        }

        Ok(())
    }

    async fn post_request(
        &self,
        server: &McpServer,
        request: &JsonRpcRequest,
    ) -> Result<PostOutcome> {
        let session_id = self.session_id_of(server.id);
        let body = serde_json::to_value(request)?;
        let outcome = self.post_value(server, &body, session_id.as_deref()).await?;
        if let PostOutcome::Reply {
            session_id,
            last_event_id,
            ..
        } = &outcome
        {
            self.capture_session_id(server.id, session_id.clone());
            if last_event_id.is_some() {
                self.capture_last_event_id(server.id, last_event_id.clone());
            }
        }
        Ok(outcome)
    }

    /// POST one JSON document to the MCP endpoint and classify the reply
    async fn post_value(
        &self,
        server: &McpServer,
        body: &Value,
        session_id: Option<&str>,
    ) -> Result<PostOutcome> {
        let client = self.pool.client_for(server)?;

        let mut builder = client
            .post(&server.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .header(MCP_PROTOCOL_VERSION_HEADER, MCP_PROTOCOL_VERSION)
            .timeout(self.pool.timeout_for(server))
            .json(body);
        if let Some(session_id) = session_id {
            builder = builder.header(MCP_SESSION_ID_HEADER, session_id);
        }
        builder = inject_upstream_auth(builder, server);

        let _guard = InFlightGuard::new(&server.name);
        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Upstream(crate::error::UpstreamError::Timeout)
            } else {
                GatewayError::upstream(e.to_string())
            }
        })?;
        telemetry::record_upstream_duration(
            &server.name,
            "streamable_http",
            started.elapsed().as_secs_f64(),
        );

        let status = response.status();
        let new_session_id = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        match status.as_u16() {
            200 => {
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                let (document, last_event_id) = if content_type.contains("text/event-stream") {
                    read_last_sse_event(response).await?
                } else {
                    let text = response
                        .text()
                        .await
                        .map_err(|e| GatewayError::upstream(e.to_string()))?;
                    (text, None)
                };

                let parsed: JsonRpcResponse = serde_json::from_str(&document)
                    .map_err(|e| GatewayError::upstream(format!("invalid JSON-RPC reply: {}", e)))?;
                Ok(PostOutcome::Reply {
                    response: parsed,
                    session_id: new_session_id,
                    last_event_id,
                })
            }
            202 => Ok(PostOutcome::Accepted {
                session_id: new_session_id,
            }),
            400 => Ok(PostOutcome::BadRequest(
                response.text().await.unwrap_or_default(),
            )),
            404 => Ok(PostOutcome::SessionExpired),
            status => Ok(PostOutcome::Failed {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn session_id_of(&self, upstream_id: Uuid) -> Option<String> {
        self.sessions
            .read()
            .get(&upstream_id)
            .and_then(|s| s.session_id.clone())
    }

    fn clear_session(&self, upstream_id: Uuid) {
        self.sessions.write().remove(&upstream_id);
    }

    fn capture_session_id(&self, upstream_id: Uuid, session_id: Option<String>) {
        let Some(session_id) = session_id else {
            return;
        };
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&upstream_id) {
            session.session_id = Some(session_id);
        }
    }

    fn capture_last_event_id(&self, upstream_id: Uuid, last_event_id: Option<String>) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&upstream_id) {
            session.last_event_id = last_event_id;
        }
    }
}


