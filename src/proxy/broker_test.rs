use super::*;
use crate::model::{McpServer, Transport, UpstreamAuth};
use chrono::Utc;
use uuid::Uuid;

fn server(url: &str, transport: Option<Transport>, active: bool) -> McpServer {
    McpServer {
        id: Uuid::new_v4(),
        name: "test".to_string(),
        url: url.to_string(),
        transport,
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

#[test]
fn test_explicit_transport_wins() {
    // URL suggests streamable but the explicit column wins
    let s = server("http://host/mcp", Some(Transport::Sse), true);
    assert_eq!(effective_transport(&s), Transport::Sse);
}

#[test]
fn test_auto_detect_mcp_suffix() {
    let s = server("http://host/mcp", None, true);
    assert_eq!(effective_transport(&s), Transport::StreamableHttp);
}

#[test]
fn test_auto_detect_trailing_slash_is_not_streamable() {
    // the /mcp suffix match is strict; a trailing slash means plain HTTP
    let s = server("http://host/mcp/", None, true);
    assert_eq!(effective_transport(&s), Transport::Http);
}

#[test]
fn test_auto_detect_plain_http() {
    let s = server("http://host/api", None, true);
    assert_eq!(effective_transport(&s), Transport::Http);
}

#[test]
fn test_inactive_server_rejected() {
    let broker = TransportBroker::new(Default::default());
    let s = server("http://host/mcp", None, false);
    let err = broker.classify(&s).unwrap_err();
    assert_eq!(err.error_code(), "server_inactive");
}

#[test]
fn test_stdio_unsupported() {
    let broker = TransportBroker::new(Default::default());
    let s = server("stdio://local", Some(Transport::Stdio), true);
    let err = broker.classify(&s).unwrap_err();
    assert_eq!(err.error_code(), "transport_unsupported");
}

fn sse_response(body: &'static str) -> reqwest::Response {
    reqwest::Response::from(
        axum::http::Response::builder()
            .header("content-type", "text/event-stream")
            .body(body)
            .unwrap(),
    )
}

#[tokio::test]
async fn test_read_last_sse_event_single() {
    let body = "event: message\ndata: {\"a\":1}\n\n";
    let (data, id) = read_last_sse_event(sse_response(body)).await.unwrap();
    assert_eq!(data, "{\"a\":1}");
    assert_eq!(id, None);
}

#[tokio::test]
async fn test_read_last_sse_event_takes_last() {
    let body = "id: 1\ndata: first\n\nid: 2\ndata: second\n\nid: 3\ndata: third\n\n";
    let (data, id) = read_last_sse_event(sse_response(body)).await.unwrap();
    assert_eq!(data, "third");
    assert_eq!(id.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_read_last_sse_event_multiline_data() {
    let body = "data: {\"a\":\ndata: 1}\n\n";
    let (data, _) = read_last_sse_event(sse_response(body)).await.unwrap();
    assert_eq!(data, "{\"a\":\n1}");
}

#[tokio::test]
async fn test_read_last_sse_event_without_data_fails() {
    assert!(read_last_sse_event(sse_response(": comment only\n\n"))
        .await
        .is_err());
}

#[test]
fn test_client_pool_rebuilds_on_settings_change() {
    let pool = ClientPool::new(Default::default());
    let mut s = server("http://host/api", None, true);

    pool.client_for(&s).unwrap();
    assert_eq!(pool.timeout_for(&s).as_secs(), 30);

    s.timeout_seconds = Some(5);
    pool.client_for(&s).unwrap();
    assert_eq!(pool.timeout_for(&s).as_secs(), 5);
}
