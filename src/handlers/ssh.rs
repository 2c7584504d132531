//! 批量执行处理器

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::{AppState, CallerId};
use crate::models::batch::{BatchRequest, NodeTestRequest};

/// 请求体无法解析（缺字段、类型不符）同样属于调用方错误
fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

/// 在多台主机上执行命令
pub async fn run_batch(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    payload: std::result::Result<Json<BatchRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload.map_err(bad_body)?;
    let report = state.batch_service.execute(request, &caller.0).await?;
    Ok(Json(report))
}

/// 测试单台主机的连接并执行命令
pub async fn test_node(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    payload: std::result::Result<Json<NodeTestRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload.map_err(bad_body)?;
    let result = state.batch_service.test_node(request, &caller.0).await?;
    Ok(Json(result))
}
