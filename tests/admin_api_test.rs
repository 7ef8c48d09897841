//! Admin surface end-to-end tests
//!
//! Namespace and user administration, API-key-driven login, and the
//! audit/analytics read endpoints.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use mcpgw::auth::MemoryPolicy;
use mcpgw::http::{AppState, build_router};
use mcpgw::model::{ApiKeyInput, User};
use mcpgw::utils::TestEnvironment;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn test_state() -> AppState {
    let env = TestEnvironment::new();
    AppState::new(
        env.config,
        env.repos,
        Arc::new(MemoryPolicy::with_defaults()),
    )
    .unwrap()
}

async fn seed_admin(state: &AppState) -> (User, String) {
    let user = User {
        id: Uuid::new_v4(),
        email: "root@example.com".to_string(),
        name: None,
        is_active: true,
        provider: None,
        external_id: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    state.repos.users.create(&user).await.unwrap();
    state.repos.users.assign_role(user.id, "admin").await.unwrap();
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();
    (user, format!("mcpgw_session={}", cookie))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_namespace_lifecycle() {
    let state = test_state();
    let (_, cookie) = seed_admin(&state).await;
    let router = build_router(state.clone());

    // create a namespace and a server to put in it
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/namespaces")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name": "team-a", "description": "A"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let ns = body_json(response).await;
    let ns_id = ns["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/servers")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name": "member", "url": "http://member.internal/mcp"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let server = body_json(response).await;
    let server_id = server["id"].as_str().unwrap().to_string();

    // add the server and grant a role
    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/api/v1/namespaces/{}/servers/{}", ns_id, server_id))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/api/v1/namespaces/{}/roles/viewer", ns_id))
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"level": "view"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // read it back with members and grants
    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/namespaces/{}", ns_id))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let loaded = body_json(response).await;
    assert_eq!(loaded["name"], "team-a");
    assert_eq!(loaded["members"][0], server_id);
    assert_eq!(loaded["grants"][0]["role"], "viewer");
    assert_eq!(loaded["grants"][0]["level"], "view");

    // duplicate namespace names conflict
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/namespaces")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name": "team-a"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // delete
    let response = router
        .oneshot(
            Request::delete(format!("/api/v1/namespaces/{}", ns_id))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_user_administration() {
    let state = test_state();
    let (_, cookie) = seed_admin(&state).await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/users")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"email": "new@example.com", "name": "New", "roles": ["viewer"]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["roles"][0], "viewer");

    // promote
    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/api/v1/users/{}/roles/operator", id))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/users/{}", id))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let loaded = body_json(response).await;
    let roles = loaded["roles"].as_array().unwrap();
    assert_eq!(roles.len(), 2);

    // deactivate
    let response = router
        .clone()
        .oneshot(
            Request::put(format!("/api/v1/users/{}", id))
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"is_active": false}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["is_active"], false);

    // invalid email is rejected
    let response = router
        .oneshot(
            Request::post("/api/v1/users")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email": "not-an-email"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_mints_usable_cookie() {
    let state = test_state();
    let user = User {
        id: Uuid::new_v4(),
        email: "keyed@example.com".to_string(),
        name: None,
        is_active: true,
        provider: None,
        external_id: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    state.repos.users.create(&user).await.unwrap();
    state.repos.users.assign_role(user.id, "admin").await.unwrap();
    let (_, plain) = state
        .repos
        .api_keys
        .create(ApiKeyInput {
            user_id: user.id,
            name: "login".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let router = build_router(state);

    // an API key authenticates the login call, which answers a cookie
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/auth/login")
                .header("x-api-key", &plain)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("mcpgw_session="));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    // the cookie works on its own
    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/servers")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // logout clears it
    let response = router
        .oneshot(
            Request::post("/api/v1/auth/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(
        response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );
}

#[tokio::test]
async fn test_audit_and_analytics_views() {
    let state = test_state();
    let (_, cookie) = seed_admin(&state).await;
    mcpgw::audit::spawn_persister(state.audit.clone(), state.repos.audit.clone());

    let router = build_router(state);

    // generate some traffic
    for _ in 0..3 {
        router
            .clone()
            .oneshot(
                Request::get("/api/v1/servers")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }
    router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/gateway/{}/x", Uuid::new_v4()))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/audit?limit=10")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let records = body_json(response).await;
    // 3 listings + 1 gateway miss (the audit read itself is not yet persisted)
    assert!(records.as_array().unwrap().len() >= 4);

    let response = router
        .oneshot(
            Request::get("/api/v1/analytics")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert!(summary["total_requests"].as_u64().unwrap() >= 4);
    assert!(summary["error_requests"].as_u64().unwrap() >= 1);
    assert!(summary["by_status"].get("2xx").is_some());
}
