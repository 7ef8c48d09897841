use crate::model::{McpServer, Transport, UpstreamAuth};
use crate::proxy::ReverseProxyExecutor;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{basic_auth, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream(url: &str) -> McpServer {
    McpServer {
        id: Uuid::new_v4(),
        name: "wire".to_string(),
        url: url.to_string(),
        transport: Some(Transport::Http),
        protocol_version: None,
        auth_type: UpstreamAuth::None,
        auth_config: None,
        timeout_seconds: Some(5),
        max_connections: None,
        is_active: true,
        allowed_tools: Default::default(),
        tags: Default::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_proxies_request_and_streams_response() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&mock)
        .await;

    let executor = ReverseProxyExecutor::new(Default::default());
    let server = upstream(&mock.uri());

    let response = executor
        .execute(
            &server,
            Method::GET,
            "/tools",
            Some("page=2"),
            &HeaderMap::new(),
            Bytes::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));
}

#[tokio::test]
async fn test_base_path_concatenation() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/base/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock)
        .await;

    let executor = ReverseProxyExecutor::new(Default::default());
    let server = upstream(&format!("{}/base/", mock.uri()));

    let response = executor
        .execute(
            &server,
            Method::GET,
            "/tools",
            None,
            &HeaderMap::new(),
            Bytes::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_auth_injected() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer upstream-token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let executor = ReverseProxyExecutor::new(Default::default());
    let mut server = upstream(&mock.uri());
    server.auth_type = UpstreamAuth::Bearer;
    server.auth_config = Some(json!({"token": "upstream-token"}));

    let response = executor
        .execute(&server, Method::GET, "/", None, &HeaderMap::new(), Bytes::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_basic_auth_injected() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(basic_auth("svc", "hunter2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let executor = ReverseProxyExecutor::new(Default::default());
    let mut server = upstream(&mock.uri());
    server.auth_type = UpstreamAuth::Basic;
    server.auth_config = Some(json!({"username": "svc", "password": "hunter2"}));

    let response = executor
        .execute(&server, Method::GET, "/", None, &HeaderMap::new(), Bytes::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_client_credentials_not_forwarded() {
    let mock = MockServer::start().await;
    // the mock matches only when no authorization header arrives
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let executor = ReverseProxyExecutor::new(Default::default());
    let server = upstream(&mock.uri());

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer client-secret".parse().unwrap());
    headers.insert("x-api-key", "mcpgw_secret".parse().unwrap());
    headers.insert("cookie", "mcpgw_session=abc".parse().unwrap());

    executor
        .execute(&server, Method::GET, "/", None, &headers, Bytes::new())
        .await
        .unwrap();

    let received = mock.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].headers.contains_key("authorization"));
    assert!(!received[0].headers.contains_key("x-api-key"));
    assert!(!received[0].headers.contains_key("cookie"));
}

#[tokio::test]
async fn test_request_body_forwarded() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(wiremock::matchers::body_json(json!({"name": "x"})))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock)
        .await;

    let executor = ReverseProxyExecutor::new(Default::default());
    let server = upstream(&mock.uri());

    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().unwrap());

    let response = executor
        .execute(
            &server,
            Method::POST,
            "/",
            None,
            &headers,
            Bytes::from(r#"{"name": "x"}"#),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_unreachable_upstream_is_transport_error() {
    let executor = ReverseProxyExecutor::new(Default::default());
    // port 9 is discard; nothing is listening
    let server = upstream("http://127.0.0.1:9");

    let err = executor
        .execute(&server, Method::GET, "/", None, &HeaderMap::new(), Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "upstream_transport");
}
