//! Utility functions and helpers
//!
//! Path rewriting for the broker route, path normalization for policy
//! objects and metrics, and client IP resolution.

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});

/// Strip the gateway prefix for one server from a request path
///
/// `/api/v1/gateway/<id>/tools/list` becomes `/tools/list`; paths outside
/// the prefix come back unchanged. The query string is not part of the
/// input and is preserved by the caller.
pub fn rewrite_gateway_path(path: &str, server_id: Uuid) -> String {
    let prefix = format!("{}/{}", crate::constants::GATEWAY_PREFIX, server_id);
    match path.strip_prefix(&prefix) {
        Some(suffix) => suffix.to_string(),
        None => path.to_string(),
    }
}

/// Join a rewritten suffix onto an upstream base path
///
/// A non-root base path is concatenated with the suffix; trailing slashes
/// on the base are dropped first.
pub fn join_upstream_path(base_path: &str, suffix: &str) -> String {
    let base = base_path.trim_end_matches('/');
    if suffix.is_empty() {
        if base.is_empty() {
            return "/".to_string();
        }
        return base.to_string();
    }
    format!("{}{}", base, suffix)
}

/// Replace UUID and bare numeric path segments with `:id`
///
/// Keeps policy objects and metric labels at route-template cardinality.
pub fn normalize_path(path: &str) -> String {
    let normalized: Vec<&str> = path
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment
            } else if UUID_SEGMENT.is_match(segment)
                || segment.chars().all(|c| c.is_ascii_digit())
            {
                ":id"
            } else {
                segment
            }
        })
        .collect();
    normalized.join("/")
}

/// Resolve the client IP for a request
///
/// Uses the connection peer address, overridden by the first entry of the
/// X-Forwarded-For chain only when the gateway is configured to trust its
/// proxy.
pub fn client_ip(
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy
        && let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
        && let Ok(ip) = first.trim().parse()
    {
        return Some(ip);
    }
    peer.map(|addr| addr.ip())
}

/// Isolated test fixture with in-memory repositories
///
/// Mirrors the production wiring: memory-backed repositories and a fixed
/// session secret. Used by unit and integration tests.
pub struct TestEnvironment {
    pub repos: crate::storage::Repositories,
    pub config: crate::config::Config,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let storage = std::sync::Arc::new(crate::storage::MemoryStorage::new());
        let repos = crate::storage::Repositories::from_backend(storage);
        let config = crate::config::Config {
            auth: Some(crate::config::AuthConfig {
                session_secret: "test-session-secret".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        Self { repos, config }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

