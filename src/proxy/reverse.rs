//! Reverse proxy executor
//!
//! Plain HTTP upstreams and path-tunnelled MCP traffic: rewrite the path,
//! inject upstream auth, forward the body, and stream the response back
//! with backpressure intact. Transport failures surface as 502.

use super::{ClientPool, inject_upstream_auth};
use crate::config::UpstreamConfig;
use crate::model::McpServer;
use crate::telemetry::{self, InFlightGuard};
use crate::{GatewayError, Result};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Method, Response, StatusCode};
use bytes::Bytes;
use futures::StreamExt;
use std::time::Instant;

/// Request headers never forwarded upstream
///
/// Client credentials are replaced by the server's own auth config; the
/// rest are hop-by-hop.
const STRIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "authorization",
    "cookie",
    "x-api-key",
    "accept-encoding",
    "transfer-encoding",
];

/// Response headers never forwarded back to the client
const STRIP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "trailer",
];

/// Streams requests to plain-HTTP upstreams
pub struct ReverseProxyExecutor {
    pool: ClientPool,
}

impl ReverseProxyExecutor {
    pub fn new(defaults: UpstreamConfig) -> Self {
        Self {
            pool: ClientPool::new(defaults),
        }
    }

    /// Proxy one request to the upstream and stream the response back
    ///
    /// `suffix` is the already-rewritten path below the gateway prefix;
    /// `query` is passed through untouched.
    pub async fn execute(
        &self,
        server: &McpServer,
        method: Method,
        suffix: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>> {
        let url = self.build_url(server, suffix, query)?;
        let client = self.pool.client_for(server)?;

        let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| GatewayError::upstream(format!("invalid method: {}", e)))?;
        let mut builder = client.request(reqwest_method, url);

        for (name, value) in headers {
            if STRIP_REQUEST_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
        builder = inject_upstream_auth(builder, server);

        // streaming responses are exempt from the per-upstream deadline
        let wants_stream = headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"));
        if !wants_stream {
            builder = builder.timeout(self.pool.timeout_for(server));
        }

        if !body.is_empty() {
            builder = builder.body(body);
        }

        let guard = InFlightGuard::new(&server.name);
        let started = Instant::now();
        let upstream = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Upstream(crate::error::UpstreamError::Timeout)
            } else {
                GatewayError::upstream(e.to_string())
            }
        })?;
        telemetry::record_upstream_duration(
            &server.name,
            "http",
            started.elapsed().as_secs_f64(),
        );

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            if STRIP_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                axum::http::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                response = response.header(name, value);
            }
        }

        // the in-flight guard rides the body stream and drops with it
        let stream = upstream.bytes_stream().map(move |chunk| {
            let _ = &guard;
            chunk
        });

        response
            .body(Body::from_stream(stream))
            .map_err(|e| GatewayError::internal(format!("failed to build response: {}", e)))
    }

    fn build_url(&self, server: &McpServer, suffix: &str, query: Option<&str>) -> Result<url::Url> {
        let mut url: url::Url = server
            .url
            .parse()
            .map_err(|e| GatewayError::Upstream(crate::error::UpstreamError::InvalidUrl(
                format!("{}: {}", server.url, e),
            )))?;
        let path = crate::utils::join_upstream_path(url.path(), suffix);
        url.set_path(&path);
        url.set_query(query);
        Ok(url)
    }
}

