//! HTTP 中间件
//! 请求追踪、调用方身份、版本头

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::concurrency::ConcurrencyController;
use crate::config::AppConfig;
use crate::realtime::TerminalBridge;
use crate::services::BatchService;
use crate::ssh::SessionConnector;

/// 未携带身份头时使用的调用方名称
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// 应用状态
///
/// 所有服务共享同一个会话建立器和并发控制器。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub batch_service: Arc<BatchService>,
    pub terminal_bridge: Arc<TerminalBridge>,
    /// 并发控制器
    pub concurrency_controller: Arc<ConcurrencyController>,
}

impl AppState {
    /// 使用给定的会话建立器组装全部服务
    pub fn new(config: AppConfig, connector: Arc<dyn SessionConnector>) -> Self {
        let concurrency_controller = Arc::new(ConcurrencyController::new(
            (&config.concurrency).into(),
        ));

        let batch_service = Arc::new(BatchService::new(
            connector.clone(),
            concurrency_controller.clone(),
            config.ssh.clone(),
        ));

        let terminal_bridge = Arc::new(TerminalBridge::new(
            connector,
            concurrency_controller.clone(),
            config.ssh.clone(),
        ));

        Self {
            config,
            batch_service,
            terminal_bridge,
            concurrency_controller,
        }
    }
}

/// 调用方身份（由外部认证层通过 `x-caller-id` 传入）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(mut req: Request, next: Next) -> Response {
    // 生成或提取 trace_id/request_id
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();
    let caller = extract_caller_id(req.headers());

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    req.extensions_mut().insert(CallerId(caller.clone()));

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        caller = %caller,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();

        // 记录指标 - 使用静态字符串
        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "OPTIONS" => "OPTIONS",
            _ => "UNKNOWN",
        };
        let status_code = match status {
            101 => "101",
            200 => "200",
            400 => "400",
            404 => "404",
            422 => "422",
            429 => "429",
            500 => "500",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_code)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        // 在响应头中添加 trace_id
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 在响应头中附带服务版本
pub async fn version_header_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        "x-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 从请求头中提取调用方身份
fn extract_caller_id(headers: &HeaderMap) -> String {
    headers
        .get("x-caller-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| ANONYMOUS_CALLER.to_string())
}
