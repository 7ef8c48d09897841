use super::*;
use crate::auth::MemoryPolicy;
use crate::model::{ApiKeyInput, AuditFilter, User};
use crate::utils::TestEnvironment;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

async fn seed_user(state: &AppState, email: &str, roles: &[&str]) -> User {
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: None,
        is_active: true,
        provider: None,
        external_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.repos.users.create(&user).await.unwrap();
    for role in roles {
        state.repos.users.assign_role(user.id, role).await.unwrap();
    }
    user
}

fn test_state() -> AppState {
    let env = TestEnvironment::new();
    AppState::new(
        env.config,
        env.repos,
        Arc::new(MemoryPolicy::with_defaults()),
    )
    .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz_is_open() {
    let router = build_router(test_state());
    let response = router
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_credentials_yield_401() {
    let router = build_router(test_state());
    let response = router
        .oneshot(Request::get("/api/v1/servers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let router = build_router(test_state());
    let response = router
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let headers = response.headers();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(
        headers["referrer-policy"],
        "strict-origin-when-cross-origin"
    );
}

#[tokio::test]
async fn test_inbound_request_id_is_kept() {
    let router = build_router(test_state());
    let response = router
        .oneshot(
            Request::get("/healthz")
                .header("x-request-id", "caller-chosen-id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "caller-chosen-id");
}

#[tokio::test]
async fn test_session_cookie_authenticates() {
    let state = test_state();
    let user = seed_user(&state, "admin@example.com", &["admin"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::get("/api/v1/servers")
                .header(
                    header::COOKIE,
                    format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_api_key_does_not_fall_back_to_session() {
    let state = test_state();
    let user = seed_user(&state, "both@example.com", &["admin"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::get("/api/v1/servers")
                .header(header::AUTHORIZATION, "Bearer mcpgw_bogus")
                .header(
                    header::COOKIE,
                    format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_policy_denies_viewer_delete() {
    let state = test_state();
    let user = seed_user(&state, "viewer@example.com", &["viewer"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["viewer".to_string()].into_iter().collect(),
        )
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::delete(format!("/api/v1/servers/{}", Uuid::new_v4()))
                .header(
                    header::COOKIE,
                    format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["error"], "forbidden_policy");
}

#[tokio::test]
async fn test_read_only_key_blocks_post_before_upstream() {
    let state = test_state();
    let user = seed_user(&state, "ro@example.com", &["operator"]).await;
    let (_, plain) = state
        .repos
        .api_keys
        .create(ApiKeyInput {
            user_id: user.id,
            name: "ro".to_string(),
            read_only: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let router = build_router(state.clone());
    let response = router
        .oneshot(
            Request::post(format!(
                "/api/v1/gateway/{}/tools/call",
                Uuid::new_v4()
            ))
            .header("x-api-key", &plain)
            .body(Body::from("{}"))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["error"], "forbidden_readonly");

    // the denial is audited
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    crate::audit::spawn_persister(state.audit.clone(), state.repos.audit.clone());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let records = state
        .repos
        .audit
        .list(&AuditFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response_status, 403);
}

#[tokio::test]
async fn test_unknown_server_is_404() {
    let state = test_state();
    let user = seed_user(&state, "op@example.com", &["admin"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::get(format!("/api/v1/gateway/{}/tools/list", Uuid::new_v4()))
                .header(
                    header::COOKIE,
                    format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["error"], "server_not_found");
}

#[tokio::test]
async fn test_api_key_lifecycle_over_http() {
    let state = test_state();
    let user = seed_user(&state, "minter@example.com", &["admin"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();
    let cookie_header = format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie);

    let router = build_router(state.clone());

    // mint
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/api-keys")
                .header(header::COOKIE, &cookie_header)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name": "ci", "scopes": ["servers:read"]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let plain = body["plain_key"].as_str().unwrap().to_string();
    assert!(plain.starts_with("mcpgw_"));

    // the minted key authenticates
    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/servers")
                .header("x-api-key", &plain)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // the fresh key has no roles beyond the owner's: admin
    assert_eq!(response.status(), StatusCode::OK);

    // revoke
    let id = body["id"].as_str().unwrap();
    let response = router
        .clone()
        .oneshot(
            Request::delete(format!("/api/v1/api-keys/{}", id))
                .header(header::COOKIE, &cookie_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // the revoked key no longer authenticates
    let response = router
        .oneshot(
            Request::get("/api/v1/servers")
                .header("x-api-key", &plain)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_http_roundtrip_server_crud() {
    let state = test_state();
    let user = seed_user(&state, "crud@example.com", &["admin"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();
    let cookie_header = format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie);

    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/servers")
                .header(header::COOKIE, &cookie_header)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name": "demo", "url": "http://demo.internal/mcp"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/servers/{}", id))
                .header(header::COOKIE, &cookie_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let loaded = body_json(response).await;
    assert_eq!(loaded["name"], "demo");

    // duplicate names conflict
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/servers")
                .header(header::COOKIE, &cookie_header)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name": "demo", "url": "http://other.internal"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = router
        .oneshot(
            Request::delete(format!("/api/v1/servers/{}", id))
                .header(header::COOKIE, &cookie_header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_validation_error_is_400() {
    let state = test_state();
    let user = seed_user(&state, "bad@example.com", &["admin"]).await;
    let cookie = state
        .sessions
        .encode(
            user.id,
            &user.email,
            ["admin".to_string()].into_iter().collect(),
        )
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::post("/api/v1/servers")
                .header(
                    header::COOKIE,
                    format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie),
                )
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name": "", "url": "not a url"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_roles_set_is_denied_by_policy() {
    let state = test_state();
    let user = seed_user(&state, "norole@example.com", &[]).await;
    let cookie = state
        .sessions
        .encode(user.id, &user.email, HashSet::new())
        .unwrap();

    let router = build_router(state);
    let response = router
        .oneshot(
            Request::get("/api/v1/servers")
                .header(
                    header::COOKIE,
                    format!("{}={}", crate::constants::SESSION_COOKIE_NAME, cookie),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
