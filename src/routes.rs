//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/ping", get(handlers::health::ping))
        .route(
            "/api/v1/system/concurrency",
            get(handlers::health::get_concurrency_status),
        );

    // 批量执行
    let ssh_routes = Router::new()
        .route("/api/ssh/test", post(handlers::ssh::test_node))
        .route("/api/ssh/batch", post(handlers::ssh::run_batch));

    // 交互终端
    let terminal_routes = Router::new().route("/ws", get(handlers::terminal::terminal_ws));

    let cors = cors_layer(&state.config.cors.allow_origin);

    Router::new()
        .merge(public_routes)
        .merge(ssh_routes)
        .merge(terminal_routes)
        .layer(axum::middleware::from_fn(crate::middleware::version_header_middleware))
        .layer(cors)
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}

/// 跨域配置
fn cors_layer(allow_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::HeaderName::from_static("x-version")]);

    match allow_origin.trim() {
        "*" | "" => layer.allow_origin(Any),
        origin => match HeaderValue::from_str(origin) {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Invalid CORS origin, allowing any");
                layer.allow_origin(Any)
            }
        },
    }
}
