//! 统一错误模型
//! 定义调用方错误类型和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::concurrency::ConcurrencyError;
use crate::ssh::CredentialError;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    // 便捷方法
    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 调用方错误记 warn，服务端错误记 error
        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::warn!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 凭据不合法属于调用方错误
impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        AppError::BadRequest(format!("Malformed credential: {}", e))
    }
}

/// 从 validator 校验错误转换
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// 批量执行只会等待许可，出错意味着信号量已关闭
impl From<ConcurrencyError> for AppError {
    fn from(e: ConcurrencyError) -> Self {
        AppError::Internal(format!("Concurrency error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::BadRequest("test".to_string()).code(), 400);
        assert_eq!(AppError::Validation("test".to_string()).code(), 400);
        assert_eq!(AppError::Internal("test".to_string()).code(), 500);
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::Internal("semaphore at /var/run/managi closed".to_string());
        let message = error.user_message();
        assert_eq!(message, "Internal server error");
        assert!(!message.contains("/var/run"));
    }

    #[test]
    fn test_credential_error_is_bad_request() {
        let error: AppError = CredentialError::MissingUsername.into();
        assert_eq!(error.code(), 400);
        assert!(error.user_message().contains("ssh_username"));
    }

    #[test]
    fn test_closed_semaphore_is_internal() {
        let error: AppError = ConcurrencyError::Closed.into();
        assert_eq!(error.code(), 500);
    }
}
