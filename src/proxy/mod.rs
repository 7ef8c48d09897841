//! Transport brokerage toward upstream MCP servers
//!
//! Classifies a registered server (HTTP / SSE / streamable HTTP) and
//! dispatches to the matching executor. Shared here: per-upstream
//! connection pools, upstream auth injection, and SSE frame parsing.

pub mod reverse;
pub mod rpc;
pub mod sse;
pub mod streamable;

use crate::config::UpstreamConfig;
use crate::model::{McpServer, Transport, UpstreamAuth};
use crate::{GatewayError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use reverse::ReverseProxyExecutor;
pub use sse::SseExecutor;
pub use streamable::{CallReply, McpSession, StreamableHttpExecutor};

/// Determine the transport for a server
///
/// An explicit `transport` field always wins; auto-detection only runs
/// when the field is empty. Auto-detection treats a strict `/mcp` URL
/// suffix (not `/mcp/`) as streamable HTTP and everything else as plain
/// HTTP.
pub fn effective_transport(server: &McpServer) -> Transport {
    if let Some(transport) = server.transport {
        return transport;
    }
    if server.url.ends_with("/mcp") {
        Transport::StreamableHttp
    } else {
        Transport::Http
    }
}

/// Per-upstream reqwest clients with pool limits from the server record
///
/// Clients are rebuilt when a server's timeout or connection cap changes.
pub(crate) struct ClientPool {
    clients: DashMap<Uuid, PooledClient>,
    defaults: UpstreamConfig,
}

struct PooledClient {
    timeout_seconds: u64,
    max_connections: usize,
    client: reqwest::Client,
}

impl ClientPool {
    pub fn new(defaults: UpstreamConfig) -> Self {
        Self {
            clients: DashMap::new(),
            defaults,
        }
    }

    /// The idle-capped client for one upstream
    pub fn client_for(&self, server: &McpServer) -> Result<reqwest::Client> {
        let timeout_seconds = self.timeout_for(server).as_secs();
        let max_connections = server
            .max_connections
            .unwrap_or(self.defaults.default_max_connections);

        if let Some(pooled) = self.clients.get(&server.id)
            && pooled.timeout_seconds == timeout_seconds
            && pooled.max_connections == max_connections
        {
            return Ok(pooled.client.clone());
        }

        // No global timeout on the client itself: streaming responses
        // outlive any per-request deadline.
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Duration::from_secs(timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::upstream(format!("failed to build client: {}", e)))?;

        self.clients.insert(
            server.id,
            PooledClient {
                timeout_seconds,
                max_connections,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    /// The per-upstream call deadline
    pub fn timeout_for(&self, server: &McpServer) -> Duration {
        Duration::from_secs(
            server
                .timeout_seconds
                .unwrap_or(self.defaults.default_timeout_seconds),
        )
    }
}

/// Inject upstream credentials into an outbound request
///
/// Unknown or incomplete auth configurations are logged and the request
/// passes through unauthenticated.
pub(crate) fn inject_upstream_auth(
    builder: reqwest::RequestBuilder,
    server: &McpServer,
) -> reqwest::RequestBuilder {
    let config = server.auth_config.as_ref();
    match server.auth_type {
        UpstreamAuth::None => builder,
        UpstreamAuth::Bearer | UpstreamAuth::OAuth => {
            let token = config.and_then(|c| {
                c.get("token")
                    .or_else(|| c.get("access_token"))
                    .and_then(|t| t.as_str())
            });
            match token {
                Some(token) => builder.bearer_auth(token),
                None => {
                    tracing::warn!(server = %server.name, "bearer auth configured without a token");
                    builder
                }
            }
        }
        UpstreamAuth::Basic => {
            let username = config.and_then(|c| c.get("username").and_then(|u| u.as_str()));
            let password = config.and_then(|c| c.get("password").and_then(|p| p.as_str()));
            match username {
                Some(username) => builder.basic_auth(username, password),
                None => {
                    tracing::warn!(server = %server.name, "basic auth configured without a username");
                    builder
                }
            }
        }
    }
}

/// Read an SSE response to completion and keep the last event
///
/// Reply-per-request semantics: the final event's data wins. Returns the
/// data payload and the last event id seen, if any.
pub(crate) async fn read_last_sse_event(
    response: reqwest::Response,
) -> Result<(String, Option<String>)> {
    use eventsource_stream::Eventsource;
    use futures::StreamExt;

    let mut stream = response.bytes_stream().eventsource();
    let mut last_data = None;
    let mut last_id = None;
    while let Some(event) = stream.next().await {
        let event =
            event.map_err(|e| GatewayError::upstream(format!("invalid SSE stream: {}", e)))?;
        if !event.data.is_empty() {
            last_data = Some(event.data);
        }
        if !event.id.is_empty() {
            last_id = Some(event.id);
        }
    }

    let data = last_data
        .ok_or_else(|| GatewayError::upstream("SSE response carried no data frame"))?;
    Ok((data, last_id))
}

/// The three executors behind the gateway route
#[derive(Clone)]
pub struct TransportBroker {
    pub reverse: Arc<ReverseProxyExecutor>,
    pub sse: Arc<SseExecutor>,
    pub streamable: Arc<StreamableHttpExecutor>,
}

impl TransportBroker {
    pub fn new(defaults: UpstreamConfig) -> Self {
        Self {
            reverse: Arc::new(ReverseProxyExecutor::new(defaults.clone())),
            sse: Arc::new(SseExecutor::new(defaults.clone())),
            streamable: Arc::new(StreamableHttpExecutor::new(defaults)),
        }
    }

    /// Classify a server for dispatch, rejecting inactive and unsupported ones
    pub fn classify(&self, server: &McpServer) -> Result<Transport> {
        if !server.is_active {
            return Err(GatewayError::ServerInactive(server.name.clone()));
        }
        match effective_transport(server) {
            Transport::Stdio => Err(GatewayError::TransportUnsupported(
                "stdio servers cannot be proxied".to_string(),
            )),
            transport => Ok(transport),
        }
    }
}

#[cfg(test)]
mod broker_test;
#[cfg(test)]
mod reverse_test;
