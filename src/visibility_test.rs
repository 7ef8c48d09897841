use crate::model::{AccessLevel, AuthType, McpServer, Namespace, Principal, UpstreamAuth};
use crate::storage::{MemoryStorage, NamespaceRepo, ServerRepo};
use crate::visibility::VisibilityFilter;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

fn principal(roles: &[&str]) -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        email: "v@example.com".to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        auth_type: AuthType::Session,
        api_key: None,
    }
}

fn server(name: &str, active: bool) -> McpServer {
    McpServer {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: format!("http://{}.internal/mcp", name),
        transport: None,
        protocol_version: None,
        auth_type: UpstreamAuth::None,
        auth_config: None,
        timeout_seconds: None,
        max_connections: None,
        is_active: active,
        allowed_tools: Default::default(),
        tags: Default::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn namespace(name: &str) -> Namespace {
    Namespace {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        members: Default::default(),
        created_at: Utc::now(),
    }
}

async fn setup() -> (Arc<MemoryStorage>, VisibilityFilter, Uuid, Uuid) {
    let storage = Arc::new(MemoryStorage::new());

    let s1 = server("alpha", true);
    let s2 = server("beta", true);
    ServerRepo::create(storage.as_ref(), &s1).await.unwrap();
    ServerRepo::create(storage.as_ref(), &s2).await.unwrap();

    let ns = namespace("team-a");
    NamespaceRepo::create(storage.as_ref(), &ns).await.unwrap();
    storage.add_server(ns.id, s1.id).await.unwrap();
    storage
        .set_role_access(ns.id, "viewer", Some(AccessLevel::View))
        .await
        .unwrap();
    storage
        .set_role_access(ns.id, "operator", Some(AccessLevel::Execute))
        .await
        .unwrap();

    let filter = VisibilityFilter::new(storage.clone());
    (storage, filter, s1.id, s2.id)
}

#[tokio::test]
async fn test_admin_bypass() {
    let (_, filter, _, _) = setup().await;
    let ids = filter
        .accessible_ids(&principal(&["admin"]), AccessLevel::View)
        .await
        .unwrap();
    assert!(ids.is_none());
}

#[tokio::test]
async fn test_view_grant_sees_member_servers_only() {
    let (_, filter, s1, s2) = setup().await;
    let ids = filter
        .accessible_ids(&principal(&["viewer"]), AccessLevel::View)
        .await
        .unwrap()
        .unwrap();
    assert!(ids.contains(&s1));
    assert!(!ids.contains(&s2));
}

#[tokio::test]
async fn test_view_grant_does_not_confer_execute() {
    let (_, filter, s1, _) = setup().await;
    let ids = filter
        .accessible_ids(&principal(&["viewer"]), AccessLevel::Execute)
        .await
        .unwrap()
        .unwrap();
    assert!(!ids.contains(&s1));
}

#[tokio::test]
async fn test_execute_grant_implies_view() {
    let (_, filter, s1, _) = setup().await;
    let p = principal(&["operator"]);

    let view = filter
        .accessible_ids(&p, AccessLevel::View)
        .await
        .unwrap()
        .unwrap();
    let execute = filter
        .accessible_ids(&p, AccessLevel::Execute)
        .await
        .unwrap()
        .unwrap();

    assert!(view.contains(&s1));
    assert!(execute.contains(&s1));
    // execute set is always a subset of the view set
    assert!(execute.is_subset(&view));
}

#[tokio::test]
async fn test_no_roles_no_access() {
    let (_, filter, _, _) = setup().await;
    let ids = filter
        .accessible_ids(&principal(&[]), AccessLevel::View)
        .await
        .unwrap()
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn test_inactive_servers_never_surface() {
    let storage = Arc::new(MemoryStorage::new());

    let dead = server("dead", false);
    ServerRepo::create(storage.as_ref(), &dead).await.unwrap();

    let ns = namespace("ns");
    NamespaceRepo::create(storage.as_ref(), &ns).await.unwrap();
    storage.add_server(ns.id, dead.id).await.unwrap();
    storage
        .set_role_access(ns.id, "viewer", Some(AccessLevel::View))
        .await
        .unwrap();

    let filter = VisibilityFilter::new(storage.clone());
    let ids = filter
        .accessible_ids(&principal(&["viewer"]), AccessLevel::View)
        .await
        .unwrap()
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn test_can_access() {
    let (_, filter, s1, s2) = setup().await;
    let p = principal(&["operator"]);

    assert!(filter.can_access(&p, s1, AccessLevel::Execute).await.unwrap());
    assert!(!filter.can_access(&p, s2, AccessLevel::View).await.unwrap());
    assert!(
        filter
            .can_access(&principal(&["admin"]), s2, AccessLevel::Execute)
            .await
            .unwrap()
    );
}
