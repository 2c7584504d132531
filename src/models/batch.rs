//! 批量执行与终端请求模型

use serde::Deserialize;

use crate::ssh::{NodeRequest, TerminalSize};

/// 批量执行请求
#[derive(Debug, Deserialize, validator::Validate)]
pub struct BatchRequest {
    #[validate(length(min = 1, message = "nodes must not be empty"))]
    pub nodes: Vec<NodeRequest>,
    /// 多行命令，执行时以换行连接
    #[validate(length(min = 1, message = "cmds must not be empty"))]
    pub cmds: Vec<String>,
    /// 单台主机的超时（秒），缺省使用配置值
    #[validate(range(min = 1, message = "timeout_secs must be greater than 0"))]
    pub timeout_secs: Option<u64>,
}

/// 单主机测试请求
#[derive(Debug, Deserialize, validator::Validate)]
pub struct NodeTestRequest {
    pub node: NodeRequest,
    #[validate(length(min = 1, message = "cmds must not be empty"))]
    pub cmds: Vec<String>,
    #[validate(range(min = 1, message = "timeout_secs must be greater than 0"))]
    pub timeout_secs: Option<u64>,
}

fn default_rows() -> u16 {
    TerminalSize::default().rows
}

fn default_cols() -> u16 {
    TerminalSize::default().cols
}

/// 终端会话的打开请求（WebSocket 第一帧）
#[derive(Debug, Deserialize)]
pub struct TerminalOpenRequest {
    #[serde(flatten)]
    pub node: NodeRequest,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
}

impl TerminalOpenRequest {
    pub fn size(&self) -> TerminalSize {
        TerminalSize::new(self.rows, self.cols)
    }
}

/// 以换行连接命令；全部为空白时返回 None
pub fn join_commands(cmds: &[String]) -> Option<String> {
    if cmds.iter().all(|c| c.trim().is_empty()) {
        return None;
    }
    Some(cmds.join("\n"))
}
