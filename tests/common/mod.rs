//! 测试公共模块
//! 提供测试配置、应用构造和请求辅助函数

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use managi::config::{
    AppConfig, ConcurrencyConfig, CorsConfig, LoggingConfig, ServerConfig, SshConfig,
};
use managi::middleware::AppState;
use managi::routes::create_router;
use managi::ssh::mock::MockConnector;
use std::sync::Arc;
use tower::ServiceExt;

/// 创建测试配置
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(), // 使用随机端口
            graceful_shutdown_timeout_secs: 5,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        ssh: SshConfig {
            connect_timeout_secs: 2,
            command_timeout_secs: 10,
            max_command_timeout_secs: 30,
            host_key_verification: "accept".to_string(),
            known_hosts_file: None,
            term: "xterm-256color".to_string(),
        },
        concurrency: ConcurrencyConfig {
            batch_limit: 10,
            terminal_limit: 2,
        },
        cors: CorsConfig {
            allow_origin: "*".to_string(),
        },
    }
}

/// 使用模拟主机创建应用状态
pub fn create_test_state(connector: MockConnector) -> Arc<AppState> {
    Arc::new(AppState::new(create_test_config(), Arc::new(connector)))
}

/// 使用模拟主机创建完整路由
pub fn create_test_app(connector: MockConnector) -> Router {
    create_router(create_test_state(connector))
}

/// 请求中的节点描述
pub fn node(name: &str, ip: &str, secret: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "ip": ip,
        "port": 22,
        "ssh_username": "root",
        "auth_type": "password",
        "auth_value": secret,
    })
}

/// 发送 JSON POST 请求，返回状态码和响应体原文
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-caller-id", "integration-test")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// 发送 GET 请求，返回状态码和 JSON 响应体
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
}
