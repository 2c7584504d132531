//! SSH 会话错误分类
//!
//! 连接、认证、通道、超时、协议五类错误彼此可区分，
//! 前端据此区分"密码错误"与"主机宕机"。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 错误类别（序列化到结果中）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 主机不可达或连接超时
    ConnectError,
    /// 凭据被拒绝
    AuthError,
    /// 远端拒绝打开 exec / 交互通道
    ChannelError,
    /// 命令超出允许时间
    ExecTimeoutError,
    /// 握手失败或远端响应异常
    ProtocolError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::ChannelError => "channel_error",
            ErrorKind::ExecTimeoutError => "exec_timeout_error",
            ErrorKind::ProtocolError => "protocol_error",
        }
    }
}

/// 会话层错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("ConnectError: {0}")]
    Connect(String),

    #[error("AuthError: {0}")]
    Auth(String),

    #[error("ChannelError: {0}")]
    Channel(String),

    #[error("ExecTimeoutError: command timed out after {:.2}s", .0.as_secs_f64())]
    ExecTimeout(Duration),

    #[error("ProtocolError: {0}")]
    Protocol(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Connect(_) => ErrorKind::ConnectError,
            SessionError::Auth(_) => ErrorKind::AuthError,
            SessionError::Channel(_) => ErrorKind::ChannelError,
            SessionError::ExecTimeout(_) => ErrorKind::ExecTimeoutError,
            SessionError::Protocol(_) => ErrorKind::ProtocolError,
        }
    }

    /// 连接阶段超时
    pub fn connect_timeout(target: &str, timeout: Duration) -> Self {
        SessionError::Connect(format!(
            "connection to {} timed out after {:.2}s",
            target,
            timeout.as_secs_f64()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinct() {
        let connect = SessionError::Connect("refused".into());
        let auth = SessionError::Auth("rejected".into());
        assert_ne!(connect.kind(), auth.kind());
        assert_eq!(connect.kind().as_str(), "connect_error");
        assert_eq!(auth.kind().as_str(), "auth_error");
    }

    #[test]
    fn test_messages_carry_kind_prefix() {
        assert_eq!(
            SessionError::Auth("authentication rejected".into()).to_string(),
            "AuthError: authentication rejected"
        );
        assert_eq!(
            SessionError::ExecTimeout(Duration::from_millis(1500)).to_string(),
            "ExecTimeoutError: command timed out after 1.50s"
        );
        assert!(SessionError::connect_timeout("root@h:22", Duration::from_secs(5))
            .to_string()
            .starts_with("ConnectError: connection to root@h:22 timed out"));
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ExecTimeoutError).unwrap();
        assert_eq!(json, "\"exec_timeout_error\"");
    }
}
