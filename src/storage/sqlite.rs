//! SQLite repository implementation
//!
//! Persistent storage for users, API keys, servers, namespaces, and audit
//! records using SQLite. Sets and JSON documents are stored as JSON text.

use super::*;
use crate::auth::apikey;
use crate::error::StorageError;
use crate::{GatewayError, Result};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::path::Path;

/// SQLite backend implementing all five repository ports
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite backend
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g., "mcpgw.db" or ":memory:" for in-memory)
    pub async fn new(dsn: &str) -> Result<Self> {
        // Prepend sqlite: prefix if not present and add create-if-missing option
        let connection_string = if dsn.starts_with("sqlite:") {
            if dsn.contains('?') {
                dsn.to_string()
            } else {
                format!("{}?mode=rwc", dsn)
            }
        } else {
            format!("sqlite:{}?mode=rwc", dsn)
        };

        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);

        // Validate path to prevent directory traversal attacks
        if file_path.contains("..") {
            return Err(GatewayError::config(
                "Database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        // Create parent directory if needed (unless it's :memory:)
        if file_path != ":memory:"
            && let Some(parent) = Path::new(file_path).parent()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect(&connection_string)
            .await
            .map_err(|e| GatewayError::storage(format!("Failed to connect to SQLite: {}", e)))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .map_err(|e| GatewayError::storage(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }

    fn parse_user(row: &SqliteRow) -> Result<User> {
        Ok(User {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            is_active: row.try_get::<i64, _>("is_active")? != 0,
            provider: row.try_get("provider")?,
            external_id: row.try_get("external_id")?,
            created_at: parse_ts(row.try_get("created_at")?),
            updated_at: parse_ts(row.try_get("updated_at")?),
        })
    }

    fn parse_api_key(row: &SqliteRow) -> Result<ApiKey> {
        Ok(ApiKey {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            user_id: Uuid::parse_str(&row.try_get::<String, _>("user_id")?)?,
            name: row.try_get("name")?,
            key_hash: row.try_get("key_hash")?,
            scopes: parse_json_set(&row.try_get::<String, _>("scopes")?)?,
            allowed_servers: parse_json_set(&row.try_get::<String, _>("allowed_servers")?)?,
            allowed_tools: parse_json_set(&row.try_get::<String, _>("allowed_tools")?)?,
            allowed_namespaces: parse_json_set(&row.try_get::<String, _>("allowed_namespaces")?)?,
            ip_whitelist: serde_json::from_str(&row.try_get::<String, _>("ip_whitelist")?)
                .map_err(StorageError::JsonError)?,
            read_only: row.try_get::<i64, _>("read_only")? != 0,
            expires_at: row.try_get::<Option<i64>, _>("expires_at")?.map(parse_ts),
            last_used_at: row.try_get::<Option<i64>, _>("last_used_at")?.map(parse_ts),
            created_at: parse_ts(row.try_get("created_at")?),
        })
    }

    fn parse_server(row: &SqliteRow) -> Result<McpServer> {
        let transport = row
            .try_get::<Option<String>, _>("transport")?
            .map(|t| parse_transport(&t))
            .transpose()?;
        let auth_type = parse_auth_type(&row.try_get::<String, _>("auth_type")?)?;
        let auth_config = row
            .try_get::<Option<String>, _>("auth_config")?
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(StorageError::JsonError)?;

        Ok(McpServer {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            transport,
            protocol_version: row.try_get("protocol_version")?,
            auth_type,
            auth_config,
            timeout_seconds: row
                .try_get::<Option<i64>, _>("timeout_seconds")?
                .map(|t| t as u64),
            max_connections: row
                .try_get::<Option<i64>, _>("max_connections")?
                .map(|m| m as usize),
            is_active: row.try_get::<i64, _>("is_active")? != 0,
            allowed_tools: parse_json_set(&row.try_get::<String, _>("allowed_tools")?)?,
            tags: parse_json_set(&row.try_get::<String, _>("tags")?)?,
            created_at: parse_ts(row.try_get("created_at")?),
            updated_at: parse_ts(row.try_get("updated_at")?),
        })
    }

    fn parse_audit(row: &SqliteRow) -> Result<AuditRecord> {
        Ok(AuditRecord {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            request_id: row.try_get("request_id")?,
            user_id: parse_opt_uuid(row.try_get("user_id")?)?,
            server_id: parse_opt_uuid(row.try_get("server_id")?)?,
            method: row.try_get("method")?,
            path: row.try_get("path")?,
            query: parse_opt_json(row.try_get("query")?)?,
            request_body: parse_opt_json(row.try_get("request_body")?)?,
            response_status: row.try_get::<i64, _>("response_status")? as u16,
            response_body: parse_opt_json(row.try_get("response_body")?)?,
            latency_ms: row.try_get("latency_ms")?,
            client_ip: row.try_get("client_ip")?,
            user_agent: row.try_get("user_agent")?,
            error_message: row.try_get("error_message")?,
            created_at: parse_ts(row.try_get("created_at")?),
        })
    }
}

fn parse_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn parse_opt_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.map(|v| Uuid::parse_str(&v)).transpose().map_err(Into::into)
}

fn parse_opt_json(value: Option<String>) -> Result<Option<serde_json::Value>> {
    Ok(value
        .map(|v| serde_json::from_str(&v))
        .transpose()
        .map_err(StorageError::JsonError)?)
}

fn parse_json_set<T>(text: &str) -> Result<HashSet<T>>
where
    T: serde::de::DeserializeOwned + Eq + std::hash::Hash,
{
    Ok(serde_json::from_str(text).map_err(StorageError::JsonError)?)
}

fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value).map_err(StorageError::JsonError)?)
}

fn parse_transport(text: &str) -> Result<Transport> {
    match text {
        "http" => Ok(Transport::Http),
        "sse" => Ok(Transport::Sse),
        "streamable_http" => Ok(Transport::StreamableHttp),
        "stdio" => Ok(Transport::Stdio),
        other => Err(GatewayError::storage(format!(
            "unknown transport in database: {}",
            other
        ))),
    }
}

fn auth_type_to_str(auth: UpstreamAuth) -> &'static str {
    match auth {
        UpstreamAuth::None => "none",
        UpstreamAuth::Basic => "basic",
        UpstreamAuth::Bearer => "bearer",
        UpstreamAuth::OAuth => "oauth",
    }
}

fn parse_auth_type(text: &str) -> Result<UpstreamAuth> {
    match text {
        "none" => Ok(UpstreamAuth::None),
        "basic" => Ok(UpstreamAuth::Basic),
        "bearer" => Ok(UpstreamAuth::Bearer),
        "oauth" => Ok(UpstreamAuth::OAuth),
        other => Err(GatewayError::storage(format!(
            "unknown auth type in database: {}",
            other
        ))),
    }
}

fn level_to_str(level: AccessLevel) -> &'static str {
    match level {
        AccessLevel::View => "view",
        AccessLevel::Execute => "execute",
    }
}

fn parse_level(text: &str) -> Result<AccessLevel> {
    match text {
        "view" => Ok(AccessLevel::View),
        "execute" => Ok(AccessLevel::Execute),
        other => Err(GatewayError::storage(format!(
            "unknown access level in database: {}",
            other
        ))),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint"))
}

#[async_trait]
impl UserRepo for SqliteStorage {
    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, name, is_active, provider, external_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.is_active as i64)
        .bind(&user.provider)
        .bind(&user.external_id)
        .bind(user.created_at.timestamp())
        .bind(user.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                GatewayError::Storage(StorageError::Conflict {
                    entity: "user".to_string(),
                    id: user.email.clone(),
                })
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_user(&r)).transpose()
    }

    async fn by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_user(&r)).transpose()
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_user).collect()
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET email = ?, name = ?, is_active = ?, provider = ?,
                    external_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.is_active as i64)
        .bind(&user.provider)
        .bind(&user.external_id)
        .bind(Utc::now().timestamp())
        .bind(user.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found("user", user.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn roles_of(&self, user_id: Uuid) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT role FROM user_roles WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("role").map_err(Into::into))
            .collect()
    }

    async fn assign_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role) VALUES (?, ?)
             ON CONFLICT(user_id, role) DO NOTHING",
        )
        .bind(user_id.to_string())
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role = ?")
            .bind(user_id.to_string())
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_or_create_oauth(
        &self,
        provider: &str,
        external_id: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<(User, bool)> {
        let row = sqlx::query(
            "SELECT * FROM users WHERE (provider = ? AND external_id = ?) OR email = ? LIMIT 1",
        )
        .bind(provider)
        .bind(external_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let mut user = Self::parse_user(&row)?;
            if user.provider.is_none() {
                user.provider = Some(provider.to_string());
                user.external_id = Some(external_id.to_string());
                UserRepo::update(self, &user).await?;
            }
            return Ok((user, false));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.map(|n| n.to_string()),
            is_active: true,
            provider: Some(provider.to_string()),
            external_id: Some(external_id.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        UserRepo::create(self, &user).await?;
        Ok((user, true))
    }

    async fn create_role(&self, role: &Role) -> Result<()> {
        sqlx::query("INSERT INTO roles (id, name, description, created_at) VALUES (?, ?, ?, ?)")
            .bind(role.id.to_string())
            .bind(&role.name)
            .bind(&role.description)
            .bind(role.created_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    GatewayError::Storage(StorageError::Conflict {
                        entity: "role".to_string(),
                        id: role.name.clone(),
                    })
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Role {
                    id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    created_at: parse_ts(row.try_get("created_at")?),
                })
            })
            .collect()
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM roles WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM user_roles WHERE role = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepo for SqliteStorage {
    async fn create(&self, input: ApiKeyInput) -> Result<(ApiKey, String)> {
        let (plain, hash) = apikey::generate();
        let record = ApiKey {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            name: input.name,
            key_hash: hash,
            scopes: input.scopes,
            allowed_servers: input.allowed_servers,
            allowed_tools: input.allowed_tools,
            allowed_namespaces: input.allowed_namespaces,
            ip_whitelist: input.ip_whitelist,
            read_only: input.read_only,
            expires_at: input.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO api_keys (id, user_id, name, key_hash, scopes, allowed_servers,
                    allowed_tools, allowed_namespaces, ip_whitelist, read_only, expires_at,
                    last_used_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(&record.name)
        .bind(&record.key_hash)
        .bind(to_json_text(&record.scopes)?)
        .bind(to_json_text(&record.allowed_servers)?)
        .bind(to_json_text(&record.allowed_tools)?)
        .bind(to_json_text(&record.allowed_namespaces)?)
        .bind(to_json_text(&record.ip_whitelist)?)
        .bind(record.read_only as i64)
        .bind(record.expires_at.map(|t| t.timestamp()))
        .bind(Option::<i64>::None)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok((record, plain))
    }

    async fn by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_api_key(&r)).transpose()
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_api_key(&r)).transpose()
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE user_id = ? ORDER BY created_at")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_api_key).collect()
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found("api_key", id.to_string()));
        }
        Ok(())
    }

    async fn update_last_used(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ServerRepo for SqliteStorage {
    async fn create(&self, server: &McpServer) -> Result<()> {
        sqlx::query(
            "INSERT INTO servers (id, name, url, transport, protocol_version, auth_type,
                    auth_config, timeout_seconds, max_connections, is_active, allowed_tools,
                    tags, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(server.id.to_string())
        .bind(&server.name)
        .bind(&server.url)
        .bind(server.transport.map(|t| t.to_string()))
        .bind(&server.protocol_version)
        .bind(auth_type_to_str(server.auth_type))
        .bind(
            server
                .auth_config
                .as_ref()
                .map(to_json_text)
                .transpose()?,
        )
        .bind(server.timeout_seconds.map(|t| t as i64))
        .bind(server.max_connections.map(|m| m as i64))
        .bind(server.is_active as i64)
        .bind(to_json_text(&server.allowed_tools)?)
        .bind(to_json_text(&server.tags)?)
        .bind(server.created_at.timestamp())
        .bind(server.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                GatewayError::Storage(StorageError::Conflict {
                    entity: "server".to_string(),
                    id: server.name.clone(),
                })
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<McpServer>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_server(&r)).transpose()
    }

    async fn list(&self, filter: &ServerFilter) -> Result<Vec<McpServer>> {
        let rows = sqlx::query("SELECT * FROM servers ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let servers: Vec<McpServer> = rows
            .iter()
            .map(Self::parse_server)
            .collect::<Result<_>>()?;
        Ok(servers
            .into_iter()
            .filter(|s| {
                filter.tag.as_deref().is_none_or(|t| s.tags.contains(t))
                    && filter.transport.is_none_or(|t| s.transport == Some(t))
                    && (!filter.active_only.unwrap_or(false) || s.is_active)
            })
            .collect())
    }

    async fn list_for_user(
        &self,
        filter: &ServerFilter,
        accessible: Option<&HashSet<Uuid>>,
    ) -> Result<Vec<McpServer>> {
        let servers = ServerRepo::list(self, filter).await?;
        Ok(match accessible {
            None => servers,
            Some(ids) => servers.into_iter().filter(|s| ids.contains(&s.id)).collect(),
        })
    }

    async fn update(&self, server: &McpServer) -> Result<()> {
        let result = sqlx::query(
            "UPDATE servers SET name = ?, url = ?, transport = ?, protocol_version = ?,
                    auth_type = ?, auth_config = ?, timeout_seconds = ?, max_connections = ?,
                    is_active = ?, allowed_tools = ?, tags = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&server.name)
        .bind(&server.url)
        .bind(server.transport.map(|t| t.to_string()))
        .bind(&server.protocol_version)
        .bind(auth_type_to_str(server.auth_type))
        .bind(
            server
                .auth_config
                .as_ref()
                .map(to_json_text)
                .transpose()?,
        )
        .bind(server.timeout_seconds.map(|t| t as i64))
        .bind(server.max_connections.map(|m| m as i64))
        .bind(server.is_active as i64)
        .bind(to_json_text(&server.allowed_tools)?)
        .bind(to_json_text(&server.tags)?)
        .bind(Utc::now().timestamp())
        .bind(server.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                GatewayError::Storage(StorageError::Conflict {
                    entity: "server".to_string(),
                    id: server.name.clone(),
                })
            } else {
                GatewayError::from(e)
            }
        })?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found("server", server.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM namespace_servers WHERE server_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM server_health WHERE server_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health(&self, id: Uuid) -> Result<Option<ServerHealth>> {
        let row = sqlx::query("SELECT * FROM server_health WHERE server_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(ServerHealth {
                server_id: Uuid::parse_str(&row.try_get::<String, _>("server_id")?)?,
                healthy: row.try_get::<i64, _>("healthy")? != 0,
                checked_at: parse_ts(row.try_get("checked_at")?),
                response_time_ms: row
                    .try_get::<Option<i64>, _>("response_time_ms")?
                    .map(|v| v as u64),
                error: row.try_get("error")?,
            })
        })
        .transpose()
    }

    async fn set_health(&self, health: &ServerHealth) -> Result<()> {
        sqlx::query(
            "INSERT INTO server_health (server_id, healthy, checked_at, response_time_ms, error)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(server_id) DO UPDATE SET
                healthy = excluded.healthy,
                checked_at = excluded.checked_at,
                response_time_ms = excluded.response_time_ms,
                error = excluded.error",
        )
        .bind(health.server_id.to_string())
        .bind(health.healthy as i64)
        .bind(health.checked_at.timestamp())
        .bind(health.response_time_ms.map(|v| v as i64))
        .bind(&health.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NamespaceRepo for SqliteStorage {
    async fn create(&self, namespace: &Namespace) -> Result<()> {
        sqlx::query("INSERT INTO namespaces (id, name, description, created_at) VALUES (?, ?, ?, ?)")
            .bind(namespace.id.to_string())
            .bind(&namespace.name)
            .bind(&namespace.description)
            .bind(namespace.created_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    GatewayError::Storage(StorageError::Conflict {
                        entity: "namespace".to_string(),
                        id: namespace.name.clone(),
                    })
                } else {
                    GatewayError::from(e)
                }
            })?;
        for server_id in &namespace.members {
            self.add_server(namespace.id, *server_id).await?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Namespace>> {
        let row = sqlx::query("SELECT * FROM namespaces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let namespace = Namespace {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            members: self.servers_of(id).await?,
            created_at: parse_ts(row.try_get("created_at")?),
        };
        Ok(Some(namespace))
    }

    async fn list(&self) -> Result<Vec<Namespace>> {
        let rows = sqlx::query("SELECT * FROM namespaces ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let mut namespaces = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = Uuid::parse_str(&row.try_get::<String, _>("id")?)?;
            namespaces.push(Namespace {
                id,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                members: self.servers_of(id).await?,
                created_at: parse_ts(row.try_get("created_at")?),
            });
        }
        Ok(namespaces)
    }

    async fn update(&self, namespace: &Namespace) -> Result<()> {
        let result = sqlx::query("UPDATE namespaces SET name = ?, description = ? WHERE id = ?")
            .bind(&namespace.name)
            .bind(&namespace.description)
            .bind(namespace.id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::not_found(
                "namespace",
                namespace.id.to_string(),
            ));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM namespaces WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM namespace_servers WHERE namespace_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM namespace_roles WHERE namespace_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_server(&self, namespace_id: Uuid, server_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO namespace_servers (namespace_id, server_id) VALUES (?, ?)
             ON CONFLICT(namespace_id, server_id) DO NOTHING",
        )
        .bind(namespace_id.to_string())
        .bind(server_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_server(&self, namespace_id: Uuid, server_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM namespace_servers WHERE namespace_id = ? AND server_id = ?")
            .bind(namespace_id.to_string())
            .bind(server_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn servers_of(&self, namespace_id: Uuid) -> Result<HashSet<Uuid>> {
        let rows = sqlx::query("SELECT server_id FROM namespace_servers WHERE namespace_id = ?")
            .bind(namespace_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Uuid::parse_str(&r.try_get::<String, _>("server_id")?).map_err(Into::into)
            })
            .collect()
    }

    async fn set_role_access(
        &self,
        namespace_id: Uuid,
        role: &str,
        level: Option<AccessLevel>,
    ) -> Result<()> {
        match level {
            Some(level) => {
                sqlx::query(
                    "INSERT INTO namespace_roles (namespace_id, role, level) VALUES (?, ?, ?)
                     ON CONFLICT(namespace_id, role) DO UPDATE SET level = excluded.level",
                )
                .bind(namespace_id.to_string())
                .bind(role)
                .bind(level_to_str(level))
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM namespace_roles WHERE namespace_id = ? AND role = ?")
                    .bind(namespace_id.to_string())
                    .bind(role)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn role_access(&self, namespace_id: Uuid) -> Result<Vec<NamespaceGrant>> {
        let rows = sqlx::query(
            "SELECT role, level FROM namespace_roles WHERE namespace_id = ? ORDER BY role",
        )
        .bind(namespace_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(NamespaceGrant {
                    namespace_id,
                    role: r.try_get("role")?,
                    level: parse_level(&r.try_get::<String, _>("level")?)?,
                })
            })
            .collect()
    }

    async fn accessible_server_ids(
        &self,
        roles: &HashSet<String>,
        min_level: AccessLevel,
    ) -> Result<HashSet<Uuid>> {
        if roles.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; roles.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT ns.server_id
             FROM namespace_servers ns
             JOIN namespace_roles nr ON nr.namespace_id = ns.namespace_id
             JOIN servers s ON s.id = ns.server_id
             WHERE s.is_active = 1
               AND nr.role IN ({})
               AND (nr.level = 'execute' OR ? = 'view')",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for role in roles {
            query = query.bind(role);
        }
        query = query.bind(level_to_str(min_level));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                Uuid::parse_str(&r.try_get::<String, _>("server_id")?).map_err(Into::into)
            })
            .collect()
    }
}

#[async_trait]
impl AuditRepo for SqliteStorage {
    async fn create(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_records (id, request_id, user_id, server_id, method, path,
                    query, request_body, response_status, response_body, latency_ms,
                    client_ip, user_agent, error_message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.request_id)
        .bind(record.user_id.map(|u| u.to_string()))
        .bind(record.server_id.map(|s| s.to_string()))
        .bind(&record.method)
        .bind(&record.path)
        .bind(record.query.as_ref().map(to_json_text).transpose()?)
        .bind(record.request_body.as_ref().map(to_json_text).transpose()?)
        .bind(record.response_status as i64)
        .bind(record.response_body.as_ref().map(to_json_text).transpose()?)
        .bind(record.latency_ms)
        .bind(&record.client_ip)
        .bind(&record.user_agent)
        .bind(&record.error_message)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>> {
        let row = sqlx::query("SELECT * FROM audit_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_audit(&r)).transpose()
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let mut sql = String::from("SELECT * FROM audit_records WHERE 1 = 1");
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.server_id.is_some() {
            sql.push_str(" AND server_id = ?");
        }
        if filter.method.is_some() {
            sql.push_str(" AND method = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND response_status = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = filter.user_id {
            query = query.bind(user_id.to_string());
        }
        if let Some(server_id) = filter.server_id {
            query = query.bind(server_id.to_string());
        }
        if let Some(method) = &filter.method {
            query = query.bind(method.to_uppercase());
        }
        if let Some(status) = filter.status {
            query = query.bind(status as i64);
        }
        if let Some(since) = filter.since {
            query = query.bind(since.timestamp());
        }
        if let Some(until) = filter.until {
            query = query.bind(until.timestamp());
        }
        query = query
            .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
            .bind(filter.offset.unwrap_or(0) as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_audit).collect()
    }
}
