//! Error types for the gateway
//!
//! This module provides a comprehensive error hierarchy using thiserror.
//! All errors can be converted to GatewayError for unified error handling.
//! The `error_code` method yields the machine-readable code that goes on
//! the wire in the `{"error": ..., "message": ...}` envelope.

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{code}: {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server is inactive: {0}")]
    ServerInactive(String),

    #[error("transport not supported: {0}")]
    TransportUnsupported(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("upstream protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    #[error("already exists: {entity} '{id}'")]
    Conflict { entity: String, id: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// Implement From for sqlx::Error - preserves the original error
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err)
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Storage(StorageError::from(err))
    }
}

impl From<uuid::Error> for GatewayError {
    fn from(err: uuid::Error) -> Self {
        GatewayError::Storage(StorageError::UuidParse(err))
    }
}

/// Upstream transport errors
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("connection timeout")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Convenient result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Create an unauthorized error
    #[inline]
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    /// Create a forbidden error naming the violated axis
    #[inline]
    pub fn forbidden<S: Into<String>>(code: &'static str, msg: S) -> Self {
        GatewayError::Forbidden {
            code,
            message: msg.into(),
        }
    }

    /// Create a validation error
    #[inline]
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GatewayError::Validation(msg.into())
    }

    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GatewayError::Config(msg.into())
    }

    /// Create a storage error with a message
    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        GatewayError::Storage(StorageError::Connection(msg.into()))
    }

    /// Create a not found error
    #[inline]
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        GatewayError::Storage(StorageError::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    /// Create an upstream transport error from a message
    #[inline]
    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        GatewayError::Upstream(UpstreamError::Http(msg.into()))
    }

    /// Create a JSON-RPC protocol error
    #[inline]
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        GatewayError::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Create an internal error for unexpected conditions
    #[inline]
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// Machine-readable code for the wire error envelope
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden { code, .. } => code,
            GatewayError::ServerNotFound(_) => "server_not_found",
            GatewayError::ServerInactive(_) => "server_inactive",
            GatewayError::TransportUnsupported(_) => "transport_unsupported",
            GatewayError::Upstream(_) => "upstream_transport",
            GatewayError::Protocol { .. } => "protocol_error",
            GatewayError::Timeout => "timeout",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Storage(StorageError::NotFound { .. }) => "not_found",
            GatewayError::Storage(StorageError::Conflict { .. }) => "conflict",
            GatewayError::Storage(_) => "storage_error",
            GatewayError::Config(_) => "config_error",
            GatewayError::Io(_) | GatewayError::Json(_) | GatewayError::Internal(_) => "internal",
        }
    }

    /// Add context to an error
    pub fn context<C: std::fmt::Display>(self, context: C) -> Self {
        match self {
            Self::Unauthorized(msg) => Self::Unauthorized(format!("{}: {}", context, msg)),
            Self::Validation(msg) => Self::Validation(format!("{}: {}", context, msg)),
            Self::Config(msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::Internal(msg) => Self::Internal(format!("{}: {}", context, msg)),
            // For errors with source, preserve the source and add context at the top level
            other => Self::Internal(format!("{}: {}", context, other)),
        }
    }
}
