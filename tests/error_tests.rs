//! 错误处理单元测试
//!
//! 测试应用错误类型的状态码、消息和响应格式

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use managi::concurrency::ConcurrencyError;
use managi::error::AppError;
use managi::ssh::CredentialError;

// ==================== 错误状态码测试 ====================

#[test]
fn test_error_status_codes() {
    assert_eq!(
        AppError::BadRequest("invalid".to_string()).status_code(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(AppError::Validation("error".to_string()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        AppError::Internal("boom".to_string()).status_code(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

// ==================== 错误转换测试 ====================

#[test]
fn test_credential_error_is_caller_error() {
    let err: AppError = CredentialError::UnsupportedAuthKind("kerberos".to_string()).into();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert!(err.user_message().starts_with("Malformed credential"));
    assert!(err.user_message().contains("kerberos"));
}

#[test]
fn test_closed_semaphore_maps_to_500() {
    let err: AppError = ConcurrencyError::Closed.into();
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.user_message(), "Internal server error");
}

// ==================== 响应格式测试 ====================

#[tokio::test]
async fn test_error_response_body() {
    let response = AppError::validation("cmds must contain a command").into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(json["error"]["code"], 400);
    assert_eq!(json["error"]["message"], "cmds must contain a command");
    assert!(!json["error"]["request_id"].as_str().unwrap().is_empty());
}
