//! Core data models for the gateway
//!
//! This module contains the data structures for principals, API keys,
//! registered MCP servers, namespaces, and audit records. These models are
//! shared between the HTTP layer, the core services, and the repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// How the principal of a request was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Session,
    ApiKey,
    OAuth,
}

/// The authenticated identity for a single request
///
/// Created by the principal resolver, carried in request extensions, never
/// persisted. When the request authenticated with an API key the key's
/// restrictions ride along for the scope guard.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub roles: HashSet<String>,
    pub auth_type: AuthType,
    pub api_key: Option<ApiKeyRestrictions>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(crate::constants::ADMIN_ROLE)
    }
}

/// Restrictions embedded in an API key
///
/// An empty set or sequence means "no restriction on this dimension".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyRestrictions {
    pub id: Uuid,
    #[serde(default)]
    pub scopes: HashSet<String>,
    #[serde(default)]
    pub allowed_servers: HashSet<Uuid>,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub allowed_namespaces: HashSet<Uuid>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// A stored API key record
///
/// Only the SHA-256 hash of the plain key is kept; the plain key is shown
/// exactly once at creation time and never persisted or logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    #[serde(default)]
    pub scopes: HashSet<String>,
    #[serde(default)]
    pub allowed_servers: HashSet<Uuid>,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub allowed_namespaces: HashSet<Uuid>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// The restriction view the scope guard consumes
    pub fn restrictions(&self) -> ApiKeyRestrictions {
        ApiKeyRestrictions {
            id: self.id,
            scopes: self.scopes.clone(),
            allowed_servers: self.allowed_servers.clone(),
            allowed_tools: self.allowed_tools.clone(),
            allowed_namespaces: self.allowed_namespaces.clone(),
            ip_whitelist: self.ip_whitelist.clone(),
            read_only: self.read_only,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Input for creating an API key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyInput {
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub scopes: HashSet<String>,
    #[serde(default)]
    pub allowed_servers: HashSet<Uuid>,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub allowed_namespaces: HashSet<Uuid>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A gateway user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_active: bool,
    /// OAuth provider name when the user was created from a bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider-side subject identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named role; permissions attached to roles live in the policy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Upstream transport of a registered MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Http,
    Sse,
    StreamableHttp,
    Stdio,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Transport::Http => "http",
            Transport::Sse => "sse",
            Transport::StreamableHttp => "streamable_http",
            Transport::Stdio => "stdio",
        };
        f.write_str(s)
    }
}

/// Authentication scheme the gateway uses toward an upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamAuth {
    #[default]
    None,
    Basic,
    Bearer,
    OAuth,
}

/// A registered upstream MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: Uuid,
    /// Globally unique display name
    pub name: String,
    pub url: String,
    /// Explicit transport wins; when absent the broker auto-detects from the URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub auth_type: UpstreamAuth,
    /// Scheme-specific credentials, e.g. {"token": ...} or {"username", "password"}
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    pub is_active: bool,
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Last recorded health probe of an upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHealth {
    pub server_id: Uuid,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Access level a role-namespace grant confers; execute implies view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    View,
    Execute,
}

/// A named grouping of upstream servers, the unit of access grants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: Uuid,
    /// Unique name
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub members: HashSet<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A role-to-namespace grant at a given access level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceGrant {
    pub namespace_id: Uuid,
    pub role: String,
    pub level: AccessLevel,
}

/// One captured request/response exchange
///
/// Created by the audit pipeline, persisted exactly once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Uuid>,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    pub response_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for audit listing and analytics
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub server_id: Option<Uuid>,
    pub method: Option<String>,
    pub status: Option<u16>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Filter for server listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerFilter {
    pub tag: Option<String>,
    pub transport: Option<Transport>,
    pub active_only: Option<bool>,
}

