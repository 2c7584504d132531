//! 健康检查处理器
//! 提供 /health、/api/ping 和 /system/concurrency 端点

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::{concurrency, middleware::AppState};

/// 存活探针响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// ping 响应
#[derive(Serialize)]
pub struct PingResponse {
    pub pong: String,
}

/// 系统状态响应
#[derive(Serialize)]
pub struct SystemStatusResponse {
    pub concurrency: concurrency::ConcurrencyStats,
}

/// 应用启动时间
static APP_START_TIME: OnceLock<Instant> = OnceLock::new();

/// 设置应用启动时间（重复调用无效）
pub fn set_start_time() {
    let _ = APP_START_TIME.set(Instant::now());
}

/// 获取应用运行时间（秒）
pub fn get_uptime() -> u64 {
    APP_START_TIME
        .get()
        .map_or(0, |start| start.elapsed().as_secs())
}

/// 存活探针
/// 快速响应，不检查依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: get_uptime(),
    })
}

/// 前端沿用的连通性探测
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        pong: "ok".to_string(),
    })
}

/// 获取并发状态
/// 返回当前并发使用情况，用于监控和告警
pub async fn get_concurrency_status(
    State(state): State<Arc<AppState>>,
) -> Json<SystemStatusResponse> {
    let stats = state.concurrency_controller.get_stats();
    Json(SystemStatusResponse { concurrency: stats })
}
