//! API 集成测试
//!
//! 通过完整路由测试 HTTP 端点，SSH 主机由内存替身模拟
//!
//! 需要启用 `mock` 特性

#![cfg(feature = "mock")]

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::{create_test_app, get_json, node, post_json};
use managi::ssh::mock::{MockConnector, MockHost};
use std::time::Duration;
use tower::ServiceExt;

// ==================== 健康检查测试 ====================

#[tokio::test]
async fn test_health_check_endpoint() {
    let (status, json) = get_json(create_test_app(MockConnector::new()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ping_endpoint() {
    let (status, json) = get_json(create_test_app(MockConnector::new()), "/api/ping").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pong"], "ok");
}

#[tokio::test]
async fn test_concurrency_status_endpoint() {
    let (status, json) =
        get_json(create_test_app(MockConnector::new()), "/api/v1/system/concurrency").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["concurrency"]["batch"]["limit"], 10);
    assert_eq!(json["concurrency"]["terminal"]["limit"], 2);
    assert_eq!(json["concurrency"]["batch"]["used"], 0);
}

#[tokio::test]
async fn test_response_headers() {
    let app = create_test_app(MockConnector::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-abc")
                .header("origin", "http://console.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(headers["x-trace-id"], "trace-abc");
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = create_test_app(MockConnector::new());

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/ssh/batch")
                .header("origin", "http://console.local")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_404_not_found() {
    let (status, _) = get_json(create_test_app(MockConnector::new()), "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ==================== 批量执行测试 ====================

#[tokio::test]
async fn test_batch_success_and_unreachable_keep_order() {
    let connector = MockConnector::new().with_host("10.0.0.1", MockHost::responding("/home/user\n"));
    let app = create_test_app(connector);

    let (status, body) = post_json(
        app,
        "/api/ssh/batch",
        serde_json::json!({
            "nodes": [node("A", "10.0.0.1", "hunter2"), node("B", "10.0.0.2", "hunter2")],
            "cmds": ["pwd"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("hunter2"), "secret leaked: {}", body);

    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["cmds"], "pwd");
    assert_eq!(report["total"], 2);
    assert_eq!(report["succeeded"], 1);
    assert_eq!(report["failed"], 1);

    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0]["name"], "A");
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["output"], serde_json::json!(["/home/user\n"]));
    assert_eq!(results[0]["auth_value"], "***");

    assert_eq!(results[1]["name"], "B");
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["error_kind"], "connect_error");
    assert!(results[1]["error"][0].as_str().unwrap().starts_with("ConnectError"));
    assert!(results[1]["time_elapsed"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_batch_command_timeout() {
    let connector = MockConnector::new()
        .with_host("10.0.0.1", MockHost::slow("never\n", Duration::from_secs(30)));
    let app = create_test_app(connector);

    let (status, body) = post_json(
        app,
        "/api/ssh/batch",
        serde_json::json!({
            "nodes": [node("A", "10.0.0.1", "pw")],
            "cmds": ["sleep 30"],
            "timeout_secs": 1,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    let result = &report["results"][0];

    assert_eq!(result["success"], false);
    assert_eq!(result["error_kind"], "exec_timeout_error");
    assert!(result["error"][0].as_str().unwrap().contains("timed out"));
    let elapsed = result["time_elapsed"].as_f64().unwrap();
    assert!((0.9..2.5).contains(&elapsed), "elapsed = {}", elapsed);
}

#[tokio::test]
async fn test_batch_auth_failure_is_an_outcome() {
    let connector = MockConnector::new().with_host("10.0.0.1", MockHost::AuthRejected);
    let app = create_test_app(connector);

    let (status, body) = post_json(
        app,
        "/api/ssh/batch",
        serde_json::json!({
            "nodes": [node("A", "10.0.0.1", "wrong")],
            "cmds": ["pwd"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["results"][0]["error_kind"], "auth_error");
}

#[tokio::test]
async fn test_batch_joins_command_lines() {
    let connector = MockConnector::new().with_host("10.0.0.1", MockHost::responding("ok\n"));
    let recorder = connector.recorder();
    let app = create_test_app(connector);

    let (status, body) = post_json(
        app,
        "/api/ssh/batch",
        serde_json::json!({
            "nodes": [node("A", "10.0.0.1", "pw")],
            "cmds": ["cd /var/log", "ls"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["cmds"], "cd /var/log\nls");
    assert_eq!(recorder.commands(), vec!["cd /var/log\nls"]);
    assert_eq!(recorder.sessions_opened(), recorder.sessions_closed());
}

#[tokio::test]
async fn test_batch_empty_nodes_rejected() {
    let (status, body) = post_json(
        create_test_app(MockConnector::new()),
        "/api/ssh/batch",
        serde_json::json!({ "nodes": [], "cmds": ["pwd"] }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"]["code"], 400);
    assert!(json["error"]["request_id"].is_string());
}

#[tokio::test]
async fn test_batch_blank_commands_rejected() {
    let (status, _) = post_json(
        create_test_app(MockConnector::new()),
        "/api/ssh/batch",
        serde_json::json!({ "nodes": [node("A", "10.0.0.1", "pw")], "cmds": ["", "   "] }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_zero_timeout_rejected() {
    let (status, _) = post_json(
        create_test_app(MockConnector::new()),
        "/api/ssh/batch",
        serde_json::json!({
            "nodes": [node("A", "10.0.0.1", "pw")],
            "cmds": ["pwd"],
            "timeout_secs": 0,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_malformed_credential_rejected() {
    let mut bad = node("A", "10.0.0.1", "hunter2");
    bad["auth_type"] = serde_json::json!("kerberos");

    let (status, body) = post_json(
        create_test_app(MockConnector::new()),
        "/api/ssh/batch",
        serde_json::json!({ "nodes": [bad], "cmds": ["pwd"] }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("kerberos"));
    assert!(!body.contains("hunter2"));
}

#[tokio::test]
async fn test_batch_missing_field_rejected() {
    let (status, _) = post_json(
        create_test_app(MockConnector::new()),
        "/api/ssh/batch",
        serde_json::json!({ "nodes": [{ "ip": "10.0.0.1" }], "cmds": ["pwd"] }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ==================== 单主机测试 ====================

#[tokio::test]
async fn test_ssh_test_endpoint_shape() {
    let connector = MockConnector::new().with_host("10.0.0.1", MockHost::responding("/root\n"));
    let app = create_test_app(connector);

    let (status, body) = post_json(
        app,
        "/api/ssh/test",
        serde_json::json!({
            "node": node("web-1", "10.0.0.1", "hunter2"),
            "cmds": ["pwd"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("hunter2"));

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["output"], serde_json::json!(["/root\n"]));
    assert_eq!(json["cmds"], "pwd");
    assert_eq!(json["node"]["name"], "web-1");
    assert_eq!(json["node"]["auth_value"], "***");
    assert!(json["time_elapsed"].is_number());
}

#[tokio::test]
async fn test_ssh_test_endpoint_unreachable() {
    let (status, body) = post_json(
        create_test_app(MockConnector::new()),
        "/api/ssh/test",
        serde_json::json!({
            "node": node("web-1", "10.9.9.9", "pw"),
            "cmds": ["pwd"],
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error_kind"], "connect_error");
    assert_eq!(json["output"], serde_json::json!([]));
}

// ==================== WebSocket 端点测试 ====================

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let app = create_test_app(MockConnector::new());

    let response = app
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
