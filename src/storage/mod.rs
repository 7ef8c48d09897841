//! Repository ports for the gateway
//!
//! Five repositories with a unified trait interface and two backends:
//! in-memory (development, tests) and SQLite.

pub mod memory;
pub mod sqlite;

use crate::{Result, model::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// User and role persistence
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user
    async fn create(&self, user: &User) -> Result<()>;

    /// Get a user by ID
    async fn by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Get a user by email
    async fn by_email(&self, email: &str) -> Result<Option<User>>;

    /// List all users
    async fn list(&self) -> Result<Vec<User>>;

    /// Update a user
    async fn update(&self, user: &User) -> Result<()>;

    /// Delete a user
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Role names held by a user
    async fn roles_of(&self, user_id: Uuid) -> Result<HashSet<String>>;

    /// Assign a role to a user
    async fn assign_role(&self, user_id: Uuid, role: &str) -> Result<()>;

    /// Remove a role from a user
    async fn remove_role(&self, user_id: Uuid, role: &str) -> Result<()>;

    /// Find a user by OAuth identity, creating one on first sight
    ///
    /// Returns the user and whether it was newly created.
    async fn find_or_create_oauth(
        &self,
        provider: &str,
        external_id: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<(User, bool)>;

    // Role registry
    /// Create a role
    async fn create_role(&self, role: &Role) -> Result<()>;

    /// List all roles
    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Delete a role by name
    async fn delete_role(&self, name: &str) -> Result<()>;
}

/// API key persistence
///
/// The plain key only exists in the `create` return value; storage keeps
/// the SHA-256 hash.
#[async_trait]
pub trait ApiKeyRepo: Send + Sync {
    /// Create a key; returns the record and the plain key (shown once)
    async fn create(&self, input: ApiKeyInput) -> Result<(ApiKey, String)>;

    /// Look up a key by its SHA-256 hex hash
    async fn by_hash(&self, hash: &str) -> Result<Option<ApiKey>>;

    /// Get a key by ID
    async fn by_id(&self, id: Uuid) -> Result<Option<ApiKey>>;

    /// List keys owned by a user
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>>;

    /// Delete a key owned by a user
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<()>;

    /// Record a use of the key (fire-and-forget from the hot path)
    async fn update_last_used(&self, id: Uuid) -> Result<()>;
}

/// Registered MCP server persistence
#[async_trait]
pub trait ServerRepo: Send + Sync {
    /// Register a server; names are globally unique
    async fn create(&self, server: &McpServer) -> Result<()>;

    /// Get a server by ID
    async fn get(&self, id: Uuid) -> Result<Option<McpServer>>;

    /// List all servers matching the filter
    async fn list(&self, filter: &ServerFilter) -> Result<Vec<McpServer>>;

    /// List servers visible to a principal
    ///
    /// `accessible = None` is the admin bypass (all servers); an empty set
    /// yields nothing; otherwise the result is filtered to the set.
    async fn list_for_user(
        &self,
        filter: &ServerFilter,
        accessible: Option<&HashSet<Uuid>>,
    ) -> Result<Vec<McpServer>>;

    /// Update a server
    async fn update(&self, server: &McpServer) -> Result<()>;

    /// Delete a server
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Last recorded health probe, if any
    async fn health(&self, id: Uuid) -> Result<Option<ServerHealth>>;

    /// Record a health probe
    async fn set_health(&self, health: &ServerHealth) -> Result<()>;
}

/// Namespace persistence and access grants
#[async_trait]
pub trait NamespaceRepo: Send + Sync {
    /// Create a namespace; names are unique
    async fn create(&self, namespace: &Namespace) -> Result<()>;

    /// Get a namespace with its membership populated
    async fn get(&self, id: Uuid) -> Result<Option<Namespace>>;

    /// List all namespaces with membership populated
    async fn list(&self) -> Result<Vec<Namespace>>;

    /// Update name/description
    async fn update(&self, namespace: &Namespace) -> Result<()>;

    /// Delete a namespace and its grants
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Add a server to a namespace
    async fn add_server(&self, namespace_id: Uuid, server_id: Uuid) -> Result<()>;

    /// Remove a server from a namespace
    async fn remove_server(&self, namespace_id: Uuid, server_id: Uuid) -> Result<()>;

    /// Member server ids of a namespace
    async fn servers_of(&self, namespace_id: Uuid) -> Result<HashSet<Uuid>>;

    /// Grant or revoke (level = None) a role's access to a namespace
    async fn set_role_access(
        &self,
        namespace_id: Uuid,
        role: &str,
        level: Option<AccessLevel>,
    ) -> Result<()>;

    /// All grants on a namespace
    async fn role_access(&self, namespace_id: Uuid) -> Result<Vec<NamespaceGrant>>;

    /// Active server ids reachable by any of `roles` at `min_level` or above
    ///
    /// A grant at `execute` satisfies `min_level = view`; only active
    /// servers are ever returned.
    async fn accessible_server_ids(
        &self,
        roles: &HashSet<String>,
        min_level: AccessLevel,
    ) -> Result<HashSet<Uuid>>;
}

/// Audit record persistence
#[async_trait]
pub trait AuditRepo: Send + Sync {
    /// Persist a record exactly once
    async fn create(&self, record: &AuditRecord) -> Result<()>;

    /// Get a record by ID
    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>>;

    /// List records matching the filter, newest first
    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>>;
}

/// The repository bundle handed to the core services
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepo>,
    pub api_keys: Arc<dyn ApiKeyRepo>,
    pub servers: Arc<dyn ServerRepo>,
    pub namespaces: Arc<dyn NamespaceRepo>,
    pub audit: Arc<dyn AuditRepo>,
}

impl Repositories {
    /// Bundle a backend that implements all five ports
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserRepo + ApiKeyRepo + ServerRepo + NamespaceRepo + AuditRepo + 'static,
    {
        Self {
            users: backend.clone(),
            api_keys: backend.clone(),
            servers: backend.clone(),
            namespaces: backend.clone(),
            audit: backend,
        }
    }
}

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Create the repository bundle from configuration
pub async fn create_repositories(
    config: &crate::config::StorageConfig,
) -> Result<Repositories> {
    match config.driver.as_str() {
        "memory" => Ok(Repositories::from_backend(Arc::new(MemoryStorage::new()))),
        "sqlite" => Ok(Repositories::from_backend(Arc::new(
            SqliteStorage::new(&config.dsn).await?,
        ))),
        _ => Err(crate::GatewayError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite",
            config.driver
        ))),
    }
}

/// Clock helper shared by the backends
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod sqlite_test;
