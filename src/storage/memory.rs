//! In-memory repository implementation
//!
//! Fast, non-persistent storage for development and testing. Uses DashMap
//! for lock-free concurrent access.
//!
//! **WARNING:** data is lost on process restart and state is not shared
//! across instances. Use SqliteStorage for real deployments.

use super::*;
use crate::auth::apikey;
use crate::error::StorageError;
use dashmap::DashMap;
use std::collections::HashMap;

/// In-memory backend implementing all five repository ports
#[derive(Clone)]
pub struct MemoryStorage {
    users: Arc<DashMap<Uuid, User>>,
    user_roles: Arc<DashMap<Uuid, HashSet<String>>>,
    roles: Arc<DashMap<String, Role>>,
    api_keys: Arc<DashMap<Uuid, ApiKey>>,
    key_ids_by_hash: Arc<DashMap<String, Uuid>>,
    servers: Arc<DashMap<Uuid, McpServer>>,
    server_health: Arc<DashMap<Uuid, ServerHealth>>,
    namespaces: Arc<DashMap<Uuid, Namespace>>,
    grants: Arc<DashMap<Uuid, HashMap<String, AccessLevel>>>,
    audit_records: Arc<DashMap<Uuid, AuditRecord>>,
}

impl MemoryStorage {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            user_roles: Arc::new(DashMap::new()),
            roles: Arc::new(DashMap::new()),
            api_keys: Arc::new(DashMap::new()),
            key_ids_by_hash: Arc::new(DashMap::new()),
            servers: Arc::new(DashMap::new()),
            server_health: Arc::new(DashMap::new()),
            namespaces: Arc::new(DashMap::new()),
            grants: Arc::new(DashMap::new()),
            audit_records: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepo for MemoryStorage {
    async fn create(&self, user: &User) -> Result<()> {
        if self.users.iter().any(|u| u.email == user.email) {
            return Err(StorageError::Conflict {
                entity: "user".to_string(),
                id: user.email.clone(),
            }
            .into());
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_unstable_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn update(&self, user: &User) -> Result<()> {
        if !self.users.contains_key(&user.id) {
            return Err(crate::GatewayError::not_found("user", user.id.to_string()));
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.users.remove(&id);
        self.user_roles.remove(&id);
        Ok(())
    }

    async fn roles_of(&self, user_id: Uuid) -> Result<HashSet<String>> {
        Ok(self
            .user_roles
            .get(&user_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn assign_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        self.user_roles
            .entry(user_id)
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    async fn remove_role(&self, user_id: Uuid, role: &str) -> Result<()> {
        if let Some(mut roles) = self.user_roles.get_mut(&user_id) {
            roles.remove(role);
        }
        Ok(())
    }

    async fn find_or_create_oauth(
        &self,
        provider: &str,
        external_id: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<(User, bool)> {
        // Match on provider identity first, then link by email.
        let existing = self.users.iter().find_map(|u| {
            let matches_provider = u.provider.as_deref() == Some(provider)
                && u.external_id.as_deref() == Some(external_id);
            (matches_provider || u.email == email).then(|| u.clone())
        });

        if let Some(mut user) = existing {
            if user.provider.is_none() {
                user.provider = Some(provider.to_string());
                user.external_id = Some(external_id.to_string());
                user.updated_at = now();
                self.users.insert(user.id, user.clone());
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
            created_at: now(),
            updated_at: now(),
        };
        self.users.insert(user.id, user.clone());
        Ok((user, true))
    }

    async fn create_role(&self, role: &Role) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.roles.entry(role.name.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(role.clone());
                Ok(())
            }
            Entry::Occupied(_) => Err(StorageError::Conflict {
                entity: "role".to_string(),
                id: role.name.clone(),
            }
            .into()),
        }
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.roles.iter().map(|r| r.clone()).collect();
        roles.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        self.roles.remove(name);
        for mut assigned in self.user_roles.iter_mut() {
            assigned.remove(name);
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyRepo for MemoryStorage {
    async fn create(&self, input: ApiKeyInput) -> Result<(ApiKey, String)> {
        let (plain, hash) = apikey::generate();
        let record = ApiKey {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            name: input.name,
            key_hash: hash.clone(),
            scopes: input.scopes,
            allowed_servers: input.allowed_servers,
            allowed_tools: input.allowed_tools,
            allowed_namespaces: input.allowed_namespaces,
            ip_whitelist: input.ip_whitelist,
            read_only: input.read_only,
            expires_at: input.expires_at,
            last_used_at: None,
            created_at: now(),
        };
        self.api_keys.insert(record.id, record.clone());
        self.key_ids_by_hash.insert(hash, record.id);
        Ok((record, plain))
    }

    async fn by_hash(&self, hash: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .key_ids_by_hash
            .get(hash)
            .and_then(|id| self.api_keys.get(&id).map(|k| k.clone())))
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<ApiKey>> {
        Ok(self.api_keys.get(&id).map(|k| k.clone()))
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .api_keys
            .iter()
            .filter(|k| k.user_id == user_id)
            .map(|k| k.clone())
            .collect();
        keys.sort_unstable_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(keys)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let owned = self
            .api_keys
            .get(&id)
            .is_some_and(|k| k.user_id == user_id);
        if !owned {
            return Err(crate::GatewayError::not_found("api_key", id.to_string()));
        }
        if let Some((_, record)) = self.api_keys.remove(&id) {
            self.key_ids_by_hash.remove(&record.key_hash);
        }
        Ok(())
    }

    async fn update_last_used(&self, id: Uuid) -> Result<()> {
        if let Some(mut key) = self.api_keys.get_mut(&id) {
            key.last_used_at = Some(now());
        }
        Ok(())
    }
}

#[async_trait]
impl ServerRepo for MemoryStorage {
    async fn create(&self, server: &McpServer) -> Result<()> {
        if self.servers.iter().any(|s| s.name == server.name) {
            return Err(StorageError::Conflict {
                entity: "server".to_string(),
                id: server.name.clone(),
            }
            .into());
        }
        self.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<McpServer>> {
        Ok(self.servers.get(&id).map(|s| s.clone()))
    }

    async fn list(&self, filter: &ServerFilter) -> Result<Vec<McpServer>> {
        let mut servers: Vec<McpServer> = self
            .servers
            .iter()
            .filter(|s| matches_filter(s, filter))
            .map(|s| s.clone())
            .collect();
        servers.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
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
        if !self.servers.contains_key(&server.id) {
            return Err(crate::GatewayError::not_found(
                "server",
                server.id.to_string(),
            ));
        }
        let name_taken = self
            .servers
            .iter()
            .any(|s| s.name == server.name && s.id != server.id);
        if name_taken {
            return Err(StorageError::Conflict {
                entity: "server".to_string(),
                id: server.name.clone(),
            }
            .into());
        }
        self.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.servers.remove(&id);
        self.server_health.remove(&id);
        for mut namespace in self.namespaces.iter_mut() {
            namespace.members.remove(&id);
        }
        Ok(())
    }

    async fn health(&self, id: Uuid) -> Result<Option<ServerHealth>> {
        Ok(self.server_health.get(&id).map(|h| h.clone()))
    }

    async fn set_health(&self, health: &ServerHealth) -> Result<()> {
        self.server_health.insert(health.server_id, health.clone());
        Ok(())
    }
}

fn matches_filter(server: &McpServer, filter: &ServerFilter) -> bool {
    if let Some(tag) = &filter.tag
        && !server.tags.contains(tag)
    {
        return false;
    }
    if let Some(transport) = filter.transport
        && server.transport != Some(transport)
    {
        return false;
    }
    if filter.active_only.unwrap_or(false) && !server.is_active {
        return false;
    }
    true
}

#[async_trait]
impl NamespaceRepo for MemoryStorage {
    async fn create(&self, namespace: &Namespace) -> Result<()> {
        if self.namespaces.iter().any(|n| n.name == namespace.name) {
            return Err(StorageError::Conflict {
                entity: "namespace".to_string(),
                id: namespace.name.clone(),
            }
            .into());
        }
        self.namespaces.insert(namespace.id, namespace.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Namespace>> {
        Ok(self.namespaces.get(&id).map(|n| n.clone()))
    }

    async fn list(&self) -> Result<Vec<Namespace>> {
        let mut namespaces: Vec<Namespace> =
            self.namespaces.iter().map(|n| n.clone()).collect();
        namespaces.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    async fn update(&self, namespace: &Namespace) -> Result<()> {
        let Some(mut existing) = self.namespaces.get_mut(&namespace.id) else {
            return Err(crate::GatewayError::not_found(
                "namespace",
                namespace.id.to_string(),
            ));
        };
        existing.name = namespace.name.clone();
        existing.description = namespace.description.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.namespaces.remove(&id);
        self.grants.remove(&id);
        Ok(())
    }

    async fn add_server(&self, namespace_id: Uuid, server_id: Uuid) -> Result<()> {
        let Some(mut namespace) = self.namespaces.get_mut(&namespace_id) else {
            return Err(crate::GatewayError::not_found(
                "namespace",
                namespace_id.to_string(),
            ));
        };
        namespace.members.insert(server_id);
        Ok(())
    }

    async fn remove_server(&self, namespace_id: Uuid, server_id: Uuid) -> Result<()> {
        if let Some(mut namespace) = self.namespaces.get_mut(&namespace_id) {
            namespace.members.remove(&server_id);
        }
        Ok(())
    }

    async fn servers_of(&self, namespace_id: Uuid) -> Result<HashSet<Uuid>> {
        Ok(self
            .namespaces
            .get(&namespace_id)
            .map(|n| n.members.clone())
            .unwrap_or_default())
    }

    async fn set_role_access(
        &self,
        namespace_id: Uuid,
        role: &str,
        level: Option<AccessLevel>,
    ) -> Result<()> {
        let mut grants = self.grants.entry(namespace_id).or_default();
        match level {
            Some(level) => {
                grants.insert(role.to_string(), level);
            }
            None => {
                grants.remove(role);
            }
        }
        Ok(())
    }

    async fn role_access(&self, namespace_id: Uuid) -> Result<Vec<NamespaceGrant>> {
        let mut grants: Vec<NamespaceGrant> = self
            .grants
            .get(&namespace_id)
            .map(|g| {
                g.iter()
                    .map(|(role, level)| NamespaceGrant {
                        namespace_id,
                        role: role.clone(),
                        level: *level,
                    })
                    .collect()
            })
            .unwrap_or_default();
        grants.sort_unstable_by(|a, b| a.role.cmp(&b.role));
        Ok(grants)
    }

    async fn accessible_server_ids(
        &self,
        roles: &HashSet<String>,
        min_level: AccessLevel,
    ) -> Result<HashSet<Uuid>> {
        let mut ids = HashSet::new();
        for namespace in self.namespaces.iter() {
            let granted = self.grants.get(&namespace.id).is_some_and(|grants| {
                grants
                    .iter()
                    .any(|(role, level)| roles.contains(role) && *level >= min_level)
            });
            if granted {
                ids.extend(namespace.members.iter().copied());
            }
        }
        // only active servers are ever surfaced
        ids.retain(|id| self.servers.get(id).is_some_and(|s| s.is_active));
        Ok(ids)
    }
}

#[async_trait]
impl AuditRepo for MemoryStorage {
    async fn create(&self, record: &AuditRecord) -> Result<()> {
        self.audit_records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>> {
        Ok(self.audit_records.get(&id).map(|r| r.clone()))
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = self
            .audit_records
            .iter()
            .filter(|r| {
                filter.user_id.is_none_or(|id| r.user_id == Some(id))
                    && filter.server_id.is_none_or(|id| r.server_id == Some(id))
                    && filter
                        .method
                        .as_deref()
                        .is_none_or(|m| r.method.eq_ignore_ascii_case(m))
                    && filter.status.is_none_or(|s| r.response_status == s)
                    && filter.since.is_none_or(|t| r.created_at >= t)
                    && filter.until.is_none_or(|t| r.created_at < t)
            })
            .map(|r| r.clone())
            .collect();
        records.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.unwrap_or(0);
        let records: Vec<AuditRecord> = records
            .into_iter()
            .skip(offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(records)
    }
}
