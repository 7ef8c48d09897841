//! API key scope guard
//!
//! Enforces the restrictions embedded in an API key: scopes, server and
//! namespace allow-lists, read-only mode, and the IP whitelist. Every
//! guard treats an empty set as "unrestricted on that axis". Guards only
//! apply when the principal authenticated with an API key.

use crate::model::{ApiKeyRestrictions, Principal};
use crate::{GatewayError, Result};
use axum::http::Method;
use ipnet::IpNet;
use std::net::IpAddr;
use uuid::Uuid;

/// Scope required to read a resource, e.g. `servers:read`
pub fn read_scope(resource: &str) -> String {
    format!("{}:read", resource)
}

/// Scope required to mutate a resource, e.g. `servers:write`
pub fn write_scope(resource: &str) -> String {
    format!("{}:write", resource)
}

/// The key's scopes must contain `scope`
pub fn require_scope(restrictions: &ApiKeyRestrictions, scope: &str) -> Result<()> {
    if restrictions.scopes.is_empty() || restrictions.scopes.contains(scope) {
        return Ok(());
    }
    Err(GatewayError::forbidden(
        "forbidden_scope",
        format!("API key lacks required scope '{}'", scope),
    ))
}

/// The key's scopes must intersect `scopes`
pub fn require_any_scope(restrictions: &ApiKeyRestrictions, scopes: &[&str]) -> Result<()> {
    if restrictions.scopes.is_empty()
        || scopes.iter().any(|s| restrictions.scopes.contains(*s))
    {
        return Ok(());
    }
    Err(GatewayError::forbidden(
        "forbidden_scope",
        format!("API key lacks any of the required scopes: {}", scopes.join(", ")),
    ))
}

/// The key's server allow-list (if non-empty) must contain `server_id`
pub fn require_server_access(restrictions: &ApiKeyRestrictions, server_id: Uuid) -> Result<()> {
    if restrictions.allowed_servers.is_empty()
        || restrictions.allowed_servers.contains(&server_id)
    {
        return Ok(());
    }
    Err(GatewayError::forbidden(
        "forbidden_server",
        format!("API key is not allowed to access server {}", server_id),
    ))
}

/// The key's namespace allow-list (if non-empty) must contain `namespace_id`
pub fn require_namespace_access(
    restrictions: &ApiKeyRestrictions,
    namespace_id: Uuid,
) -> Result<()> {
    if restrictions.allowed_namespaces.is_empty()
        || restrictions.allowed_namespaces.contains(&namespace_id)
    {
        return Ok(());
    }
    Err(GatewayError::forbidden(
        "forbidden_namespace",
        format!("API key is not allowed to access namespace {}", namespace_id),
    ))
}

/// Whether a method is safe for read-only keys
pub fn is_read_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Read-only keys may only issue GET, HEAD, and OPTIONS
pub fn enforce_read_only(restrictions: &ApiKeyRestrictions, method: &Method) -> Result<()> {
    if !restrictions.read_only || is_read_method(method) {
        return Ok(());
    }
    Err(GatewayError::forbidden(
        "forbidden_readonly",
        format!("read-only API key may not issue {}", method),
    ))
}

/// The client IP must match at least one whitelist entry
///
/// Entries are literal addresses or CIDR blocks. A malformed entry never
/// grants; a whitelist consisting solely of malformed entries denies all.
pub fn enforce_ip_whitelist(restrictions: &ApiKeyRestrictions, client_ip: IpAddr) -> Result<()> {
    if restrictions.ip_whitelist.is_empty() {
        return Ok(());
    }

    for entry in &restrictions.ip_whitelist {
        if let Ok(net) = entry.parse::<IpNet>() {
            if net.contains(&client_ip) {
                return Ok(());
            }
        } else if let Ok(addr) = entry.parse::<IpAddr>() {
            if addr == client_ip {
                return Ok(());
            }
        } else {
            tracing::warn!(entry = %entry, "malformed IP whitelist entry on API key");
        }
    }

    Err(GatewayError::forbidden(
        "forbidden_ip",
        format!("client address {} is not whitelisted", client_ip),
    ))
}

/// Run the per-request guards in order, first failure wins
///
/// Order: scopes, server allow-list, namespace allow-list, read-only,
/// IP whitelist. Principals without an API key pass untouched.
pub fn enforce_request(
    principal: &Principal,
    required_scopes: &[&str],
    method: &Method,
    client_ip: Option<IpAddr>,
    server_id: Option<Uuid>,
    namespace_id: Option<Uuid>,
) -> Result<()> {
    let Some(restrictions) = &principal.api_key else {
        return Ok(());
    };

    if !required_scopes.is_empty() {
        require_any_scope(restrictions, required_scopes)?;
    }
    if let Some(server_id) = server_id {
        require_server_access(restrictions, server_id)?;
    }
    if let Some(namespace_id) = namespace_id {
        require_namespace_access(restrictions, namespace_id)?;
    }
    enforce_read_only(restrictions, method)?;
    if !restrictions.ip_whitelist.is_empty() {
        let Some(ip) = client_ip else {
            return Err(GatewayError::forbidden(
                "forbidden_ip",
                "client address could not be determined",
            ));
        };
        enforce_ip_whitelist(restrictions, ip)?;
    }
    Ok(())
}

