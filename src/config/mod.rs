//! Configuration management for the gateway
//!
//! Loads configuration from mcpgw.config.json with MCPGW_* environment
//! variable overrides for deployment knobs.

use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Storage configuration (required)
    pub storage: StorageConfig,

    /// HTTP server configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpConfig>,

    /// Authentication configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Upstream proxy defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,

    /// Audit pipeline configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditConfig>,

    /// Logging configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver name (memory, sqlite)
    pub driver: String,

    /// Data source name / connection string
    pub dsn: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable secure cookies and HSTS (requires HTTPS termination)
    #[serde(default)]
    pub secure: bool,

    /// Allowed CORS origins; defaults to localhost origins for development
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,

    /// Trust the first X-Forwarded-For entry for client IP resolution
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
            allowed_origins: None,
            trust_proxy: false,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Secret used to sign browser session cookies
    #[serde(default)]
    pub session_secret: String,

    /// Accept mcpgw_ API keys (default: true)
    #[serde(default = "default_true")]
    pub api_key_enabled: bool,

    /// Accept signed session cookies (default: true)
    #[serde(default = "default_true")]
    pub session_enabled: bool,

    /// Bearer token validation against an external issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            api_key_enabled: true,
            session_enabled: true,
            oauth: None,
        }
    }
}

/// OAuth bearer token validation configuration
///
/// The gateway only validates tokens issued elsewhere; it is not an
/// identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Expected token issuer URL
    pub issuer: String,

    /// Expected audience (client id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret; doubles as the HS256 verification key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Create a local user on first sight of a valid token (default: true)
    #[serde(default = "default_true")]
    pub auto_create_users: bool,

    /// Role granted to auto-created users
    #[serde(default = "default_oauth_role")]
    pub default_role: String,
}

/// Upstream proxy defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Deadline for non-streaming requests and upstream calls without a
    /// per-server timeout (seconds)
    #[serde(default = "default_upstream_timeout")]
    pub default_timeout_seconds: u64,

    /// Idle connection cap per upstream pool
    #[serde(default = "default_max_connections")]
    pub default_max_connections: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_upstream_timeout(),
            default_max_connections: default_max_connections(),
        }
    }
}

/// Audit pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Capacity of the bounded audit queue
    #[serde(default = "default_audit_capacity")]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_audit_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    crate::constants::DEFAULT_HTTP_HOST.to_string()
}

fn default_port() -> u16 {
    crate::constants::DEFAULT_HTTP_PORT
}

fn default_oauth_role() -> String {
    crate::constants::DEFAULT_OAUTH_ROLE.to_string()
}

fn default_upstream_timeout() -> u64 {
    crate::constants::DEFAULT_UPSTREAM_TIMEOUT_SECS
}

fn default_max_connections() -> usize {
    crate::constants::DEFAULT_UPSTREAM_MAX_CONNECTIONS
}

fn default_audit_capacity() -> usize {
    crate::constants::DEFAULT_AUDIT_QUEUE_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                driver: "memory".to_string(),
                dsn: String::new(),
            },
            http: None,
            auth: None,
            upstream: None,
            audit: None,
            log: None,
        }
    }
}

impl Config {
    /// Load configuration from the default file, then apply env overrides
    pub fn load() -> Result<Self> {
        Self::load_from_path(crate::constants::CONFIG_FILE_NAME)
    }

    /// Load configuration from a specific path, then apply env overrides
    ///
    /// A missing file yields the default configuration so a bare
    /// `mcpgw serve` works with in-memory storage.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply MCPGW_* environment variable overrides
    ///
    /// Recognized: MCPGW_LISTEN_ADDR, MCPGW_DB_URL, MCPGW_SESSION_SECRET,
    /// MCPGW_OAUTH_ISSUER, MCPGW_OAUTH_CLIENT_ID, MCPGW_OAUTH_CLIENT_SECRET,
    /// MCPGW_TRUST_PROXY, MCPGW_AUDIT_QUEUE_CAPACITY.
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = env::var("MCPGW_LISTEN_ADDR") {
            let http = self.http.get_or_insert_with(HttpConfig::default);
            if let Some((host, port)) = addr.rsplit_once(':') {
                http.host = host.to_string();
                if let Ok(port) = port.parse() {
                    http.port = port;
                }
            } else {
                http.host = addr;
            }
        }

        if let Ok(dsn) = env::var("MCPGW_DB_URL") {
            self.storage.dsn = dsn;
            if self.storage.driver == "memory" {
                self.storage.driver = "sqlite".to_string();
            }
        }

        if let Ok(secret) = env::var("MCPGW_SESSION_SECRET") {
            self.auth.get_or_insert_with(AuthConfig::default).session_secret = secret;
        }

        if let Ok(issuer) = env::var("MCPGW_OAUTH_ISSUER") {
            let auth = self.auth.get_or_insert_with(AuthConfig::default);
            let oauth = auth.oauth.get_or_insert_with(|| OAuthConfig {
                issuer: issuer.clone(),
                client_id: None,
                client_secret: None,
                auto_create_users: true,
                default_role: default_oauth_role(),
            });
            oauth.issuer = issuer;
            if let Ok(id) = env::var("MCPGW_OAUTH_CLIENT_ID") {
                oauth.client_id = Some(id);
            }
            if let Ok(secret) = env::var("MCPGW_OAUTH_CLIENT_SECRET") {
                oauth.client_secret = Some(secret);
            }
        }

        if let Ok(trust) = env::var("MCPGW_TRUST_PROXY") {
            self.http.get_or_insert_with(HttpConfig::default).trust_proxy =
                matches!(trust.as_str(), "1" | "true" | "yes");
        }

        if let Ok(cap) = env::var("MCPGW_AUDIT_QUEUE_CAPACITY")
            && let Ok(cap) = cap.parse()
        {
            self.audit.get_or_insert_with(AuditConfig::default).queue_capacity = cap;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.storage.driver.as_str() {
            "memory" => {}
            "sqlite" => {
                if self.storage.dsn.is_empty() {
                    return Err(GatewayError::config("sqlite storage requires a dsn"));
                }
            }
            other => {
                return Err(GatewayError::config(format!(
                    "Unknown storage driver: {}. Supported: memory, sqlite",
                    other
                )));
            }
        }

        if let Some(audit) = &self.audit
            && audit.queue_capacity == 0
        {
            return Err(GatewayError::config("audit queue capacity must be > 0"));
        }

        if let Some(auth) = &self.auth
            && auth.session_enabled
            && auth.session_secret.is_empty()
        {
            tracing::warn!("session auth enabled without a session secret; cookies disabled");
        }

        Ok(())
    }

    /// HTTP configuration with defaults filled in
    pub fn http(&self) -> HttpConfig {
        self.http.clone().unwrap_or_default()
    }

    /// Auth configuration with defaults filled in
    pub fn auth(&self) -> AuthConfig {
        self.auth.clone().unwrap_or_default()
    }

    /// Upstream defaults with defaults filled in
    pub fn upstream(&self) -> UpstreamConfig {
        self.upstream.clone().unwrap_or_default()
    }

    /// Audit configuration with defaults filled in
    pub fn audit(&self) -> AuditConfig {
        self.audit.clone().unwrap_or_default()
    }
}
