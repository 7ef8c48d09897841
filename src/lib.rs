//! mcpgw - Authenticating multi-tenant gateway for MCP servers
//!
//! The gateway sits between programmatic clients and a fleet of
//! registered upstream MCP servers speaking legacy HTTP, SSE, or the
//! streamable HTTP transport. It can be:
//! - Run as a CLI tool (`mcpgw serve`)
//! - Embedded as a library (build a router from [`http::AppState`])
//!
//! # Architecture
//!
//! Requests flow through a fixed pipeline: correlation, credential
//! extraction, principal resolution, API key scope guarding, role-based
//! policy, namespace-derived visibility, and finally the transport
//! broker, while the audit pipeline observes the exchange out-of-band.
//! Layering is unidirectional: `http` → core services → repository
//! ports.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpgw::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     mcpgw::init_logging();
//!     let config = Config::load()?;
//!     mcpgw::http::start_server(config).await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;

// Core services
pub mod audit;
pub mod auth;
pub mod proxy;
pub mod visibility;

// Infrastructure
pub mod config;
pub mod storage;
pub mod telemetry;

// Interface layers
pub mod cli;
pub mod http;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use error::{GatewayError, Result};
pub use model::{ApiKey, AuditRecord, McpServer, Namespace, Principal, User};

/// Initialize logging for the application
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mcpgw=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod model_test;
#[cfg(test)]
mod visibility_test;
