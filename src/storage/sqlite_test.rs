use super::*;
use crate::model::{
    AccessLevel, ApiKeyInput, AuditFilter, AuditRecord, McpServer, Namespace, ServerFilter,
    ServerHealth, Transport, UpstreamAuth, User,
};
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

async fn sqlite() -> SqliteStorage {
    SqliteStorage::new(":memory:").await.unwrap()
}

#[tokio::test]
async fn test_file_backed_database_is_created() {
    let dir = tempfile::TempDir::new().unwrap();
    let dsn = dir.path().join("nested").join("gateway.db");
    let storage = SqliteStorage::new(dsn.to_str().unwrap()).await.unwrap();

    // migrations ran and the file exists on disk
    assert!(dsn.exists());
    UserRepo::create(&storage, &user("disk@example.com"))
        .await
        .unwrap();
    assert!(storage.by_email("disk@example.com").await.unwrap().is_some());
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    assert!(SqliteStorage::new("../escape.db").await.is_err());
}

fn user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: Some("Test".to_string()),
        is_active: true,
        provider: None,
        external_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn server(name: &str) -> McpServer {
    McpServer {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: format!("http://{}/mcp", name),
        transport: Some(Transport::StreamableHttp),
        protocol_version: Some("2025-11-25".to_string()),
        auth_type: UpstreamAuth::Bearer,
        auth_config: Some(serde_json::json!({"token": "t"})),
        timeout_seconds: Some(15),
        max_connections: Some(4),
        is_active: true,
        allowed_tools: ["echo".to_string()].into_iter().collect(),
        tags: ["prod".to_string()].into_iter().collect(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_user_round_trip() {
    let storage = sqlite().await;
    let u = user("sql@example.com");
    UserRepo::create(&storage, &u).await.unwrap();

    let loaded = UserRepo::by_id(&storage, u.id).await.unwrap().unwrap();
    assert_eq!(loaded.email, u.email);
    assert!(loaded.is_active);

    storage.assign_role(u.id, "admin").await.unwrap();
    assert!(storage.roles_of(u.id).await.unwrap().contains("admin"));

    // duplicate assignment is a no-op
    storage.assign_role(u.id, "admin").await.unwrap();
    assert_eq!(storage.roles_of(u.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unique_email_enforced() {
    let storage = sqlite().await;
    UserRepo::create(&storage, &user("uniq@example.com"))
        .await
        .unwrap();
    let err = UserRepo::create(&storage, &user("uniq@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "conflict");
}

#[tokio::test]
async fn test_server_round_trip_preserves_fields() {
    let storage = sqlite().await;
    let s = server("full");
    ServerRepo::create(&storage, &s).await.unwrap();

    let loaded = ServerRepo::get(&storage, s.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "full");
    assert_eq!(loaded.transport, Some(Transport::StreamableHttp));
    assert_eq!(loaded.auth_type, UpstreamAuth::Bearer);
    assert_eq!(loaded.auth_config, s.auth_config);
    assert_eq!(loaded.timeout_seconds, Some(15));
    assert_eq!(loaded.max_connections, Some(4));
    assert!(loaded.allowed_tools.contains("echo"));
    assert!(loaded.tags.contains("prod"));
}

#[tokio::test]
async fn test_api_key_round_trip() {
    let storage = sqlite().await;
    let owner = user("key-owner@example.com");
    UserRepo::create(&storage, &owner).await.unwrap();

    let allowed_server = Uuid::new_v4();
    let (record, plain) = ApiKeyRepo::create(
        &storage,
        ApiKeyInput {
            user_id: owner.id,
            name: "restricted".to_string(),
            scopes: ["servers:read".to_string()].into_iter().collect(),
            allowed_servers: [allowed_server].into_iter().collect(),
            ip_whitelist: vec!["10.0.0.0/24".to_string()],
            read_only: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let hash = crate::auth::apikey::hash(&plain);
    let loaded = storage.by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(loaded.id, record.id);
    assert!(loaded.read_only);
    assert!(loaded.scopes.contains("servers:read"));
    assert!(loaded.allowed_servers.contains(&allowed_server));
    assert_eq!(loaded.ip_whitelist, vec!["10.0.0.0/24".to_string()]);

    storage.update_last_used(record.id).await.unwrap();
    let touched = ApiKeyRepo::by_id(&storage, record.id)
        .await
        .unwrap()
        .unwrap();
    assert!(touched.last_used_at.is_some());
}

#[tokio::test]
async fn test_accessible_server_ids_joins_grants() {
    let storage = sqlite().await;

    let visible = server("visible");
    let hidden = server("hidden");
    let mut dead = server("dead");
    dead.is_active = false;
    for s in [&visible, &hidden, &dead] {
        ServerRepo::create(&storage, s).await.unwrap();
    }

    let ns = Namespace {
        id: Uuid::new_v4(),
        name: "granted".to_string(),
        description: None,
        members: [visible.id, dead.id].into_iter().collect(),
        created_at: Utc::now(),
    };
    NamespaceRepo::create(&storage, &ns).await.unwrap();
    storage
        .set_role_access(ns.id, "viewer", Some(AccessLevel::View))
        .await
        .unwrap();

    let roles: HashSet<String> = ["viewer".to_string()].into_iter().collect();

    let view = storage
        .accessible_server_ids(&roles, AccessLevel::View)
        .await
        .unwrap();
    assert!(view.contains(&visible.id));
    assert!(!view.contains(&hidden.id));
    // inactive members never surface
    assert!(!view.contains(&dead.id));

    // a view grant does not satisfy execute
    let execute = storage
        .accessible_server_ids(&roles, AccessLevel::Execute)
        .await
        .unwrap();
    assert!(execute.is_empty());
}

#[tokio::test]
async fn test_server_health_upsert() {
    let storage = sqlite().await;
    let s = server("probed");
    ServerRepo::create(&storage, &s).await.unwrap();

    let health = ServerHealth {
        server_id: s.id,
        healthy: false,
        checked_at: Utc::now(),
        response_time_ms: Some(120),
        error: Some("connection refused".to_string()),
    };
    storage.set_health(&health).await.unwrap();

    let loaded = storage.health(s.id).await.unwrap().unwrap();
    assert!(!loaded.healthy);
    assert_eq!(loaded.response_time_ms, Some(120));

    // second write replaces the row
    storage
        .set_health(&ServerHealth {
            healthy: true,
            error: None,
            ..health
        })
        .await
        .unwrap();
    assert!(storage.health(s.id).await.unwrap().unwrap().healthy);
}

#[tokio::test]
async fn test_audit_round_trip_and_filters() {
    let storage = sqlite().await;
    let server_id = Uuid::new_v4();

    let record = AuditRecord {
        id: Uuid::new_v4(),
        request_id: "r-1".to_string(),
        user_id: Some(Uuid::new_v4()),
        server_id: Some(server_id),
        method: "POST".to_string(),
        path: format!("/api/v1/gateway/{}/tools/call", server_id),
        query: Some(serde_json::json!({"page": "1"})),
        request_body: Some(serde_json::json!({"name": "echo"})),
        response_status: 200,
        response_body: Some(serde_json::json!({"content": []})),
        latency_ms: 42,
        client_ip: Some("10.0.0.7".to_string()),
        user_agent: Some("test-agent".to_string()),
        error_message: None,
        created_at: Utc::now(),
    };
    AuditRepo::create(&storage, &record).await.unwrap();

    let loaded = AuditRepo::get(&storage, record.id).await.unwrap().unwrap();
    assert_eq!(loaded.request_id, "r-1");
    assert_eq!(loaded.query, record.query);
    assert_eq!(loaded.request_body, record.request_body);
    assert_eq!(loaded.response_body, record.response_body);

    let by_server = AuditRepo::list(
        &storage,
        &AuditFilter {
            server_id: Some(server_id),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_server.len(), 1);

    let miss = AuditRepo::list(
        &storage,
        &AuditFilter {
            status: Some(404),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(miss.is_empty());
}
