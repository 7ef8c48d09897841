//! Legacy SSE executor
//!
//! Pre-streamable MCP servers take synchronous JSON-RPC on a `/message`
//! endpoint next to their SSE stream. The reply is a single JSON-RPC
//! document, either plain JSON or wrapped in one SSE data frame.

use super::rpc::{JsonRpcRequest, JsonRpcResponse};
use super::{ClientPool, inject_upstream_auth, read_last_sse_event};
use crate::config::UpstreamConfig;
use crate::model::McpServer;
use crate::telemetry::{self, InFlightGuard};
use crate::{GatewayError, Result};
use serde_json::Value;
use std::time::Instant;

/// Synchronous JSON-RPC toward legacy SSE upstreams
pub struct SseExecutor {
    pool: ClientPool,
}

impl SseExecutor {
    pub fn new(defaults: UpstreamConfig) -> Self {
        Self {
            pool: ClientPool::new(defaults),
        }
    }

    /// Issue one JSON-RPC call and return its result value
    pub async fn call(
        &self,
        server: &McpServer,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let request = JsonRpcRequest::new(method, params);
        let response = self.send(server, &request).await?;
        response.into_result()
    }

    /// Send a pre-built envelope and parse the reply
    pub async fn send(
        &self,
        server: &McpServer,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse> {
        let endpoint = format!("{}/message", server.url.trim_end_matches('/'));
        let client = self.pool.client_for(server)?;

        let mut builder = client
            .post(&endpoint)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .timeout(self.pool.timeout_for(server))
            .json(request);
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
        telemetry::record_upstream_duration(&server.name, "sse", started.elapsed().as_secs_f64());

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !status.is_success() {
            return Err(GatewayError::Upstream(crate::error::UpstreamError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }));
        }

        // the reply is one JSON-RPC document, either plain or wrapped in
        // SSE framing where the last data frame wins
        let document = if content_type.contains("text/event-stream") {
            read_last_sse_event(response).await?.0
        } else {
            response
                .text()
                .await
                .map_err(|e| GatewayError::upstream(e.to_string()))?
        };

        serde_json::from_str(&document)
            .map_err(|e| GatewayError::upstream(format!("invalid JSON-RPC reply: {}", e)))
    }
}

