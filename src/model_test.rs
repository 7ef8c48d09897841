use crate::model::*;
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

#[test]
fn test_principal_roles() {
    let principal = Principal {
        user_id: Uuid::new_v4(),
        email: "op@example.com".to_string(),
        roles: ["operator".to_string()].into_iter().collect(),
        auth_type: AuthType::ApiKey,
        api_key: None,
    };

    assert!(principal.has_role("operator"));
    assert!(!principal.has_role("admin"));
    assert!(!principal.is_admin());
}

#[test]
fn test_api_key_expiry() {
    let now = Utc::now();
    let mut key = ApiKey {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: "ci".to_string(),
        key_hash: String::new(),
        scopes: HashSet::new(),
        allowed_servers: HashSet::new(),
        allowed_tools: HashSet::new(),
        allowed_namespaces: HashSet::new(),
        ip_whitelist: Vec::new(),
        read_only: false,
        expires_at: None,
        last_used_at: None,
        created_at: now,
    };

    assert!(!key.is_expired(now));

    key.expires_at = Some(now - chrono::Duration::seconds(1));
    assert!(key.is_expired(now));

    key.expires_at = Some(now + chrono::Duration::hours(1));
    assert!(!key.is_expired(now));
}

#[test]
fn test_access_level_ordering() {
    // execute implies view
    assert!(AccessLevel::Execute > AccessLevel::View);
}

#[test]
fn test_transport_serde_names() {
    let json = serde_json::to_string(&Transport::StreamableHttp).unwrap();
    assert_eq!(json, "\"streamable_http\"");

    let parsed: Transport = serde_json::from_str("\"sse\"").unwrap();
    assert_eq!(parsed, Transport::Sse);

    assert_eq!(Transport::StreamableHttp.to_string(), "streamable_http");
}

#[test]
fn test_restrictions_projection() {
    let key = ApiKey {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: "restricted".to_string(),
        key_hash: "abc".to_string(),
        scopes: ["servers:read".to_string()].into_iter().collect(),
        allowed_servers: HashSet::new(),
        allowed_tools: HashSet::new(),
        allowed_namespaces: HashSet::new(),
        ip_whitelist: vec!["10.0.0.0/24".to_string()],
        read_only: true,
        expires_at: None,
        last_used_at: None,
        created_at: Utc::now(),
    };

    let restrictions = key.restrictions();
    assert_eq!(restrictions.id, key.id);
    assert!(restrictions.read_only);
    assert!(restrictions.scopes.contains("servers:read"));
    assert!(restrictions.allowed_servers.is_empty());
}
