//! Constants used throughout the gateway
//!
//! Defaults for network binding, credential formats, proxy limits, and the
//! header names the gateway emits or consumes.

// ============================================================================
// NETWORK
// ============================================================================

/// Default HTTP listen host
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// API route prefix for all northbound endpoints
pub const API_PREFIX: &str = "/api/v1";

/// Route prefix for the broker route (server id segment follows)
pub const GATEWAY_PREFIX: &str = "/api/v1/gateway";

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Literal prefix of every API key issued by the gateway
pub const API_KEY_PREFIX: &str = "mcpgw_";

/// Number of random bytes behind the hex portion of an API key
pub const API_KEY_RANDOM_BYTES: usize = 32;

/// Name of the signed browser session cookie
pub const SESSION_COOKIE_NAME: &str = "mcpgw_session";

/// Header carrying an API key outside the Authorization header
pub const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// MCP TRANSPORT
// ============================================================================

/// Protocol revision spoken to streamable HTTP upstreams
pub const MCP_PROTOCOL_VERSION: &str = "2025-11-25";

/// Session id header exchanged with streamable HTTP upstreams
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Protocol version header sent to streamable HTTP upstreams
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Client name reported in the MCP initialize handshake
pub const MCP_CLIENT_NAME: &str = "mcpgw";

// ============================================================================
// LIMITS
// ============================================================================

/// Default per-request deadline when no per-server timeout applies (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default per-upstream timeout when the server record carries none (seconds)
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Default idle connection cap per upstream pool
pub const DEFAULT_UPSTREAM_MAX_CONNECTIONS: usize = 10;

/// Default capacity of the audit queue
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Largest request/response body captured verbatim into an audit record
pub const AUDIT_BODY_CAP_BYTES: usize = 10 * 1024;

/// Browser session lifetime (hours)
pub const SESSION_TTL_HOURS: i64 = 24;

// ============================================================================
// HEADERS EMITTED BY THE GATEWAY
// ============================================================================

/// Correlation id header set on every response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ============================================================================
// ROLES
// ============================================================================

/// Role that bypasses namespace visibility filtering
pub const ADMIN_ROLE: &str = "admin";

/// Role assigned to auto-created OAuth users when none is configured
pub const DEFAULT_OAUTH_ROLE: &str = "user";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "mcpgw.config.json";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MCPGW_";
