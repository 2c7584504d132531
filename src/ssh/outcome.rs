//! 执行结果模型
//!
//! 单主机结果与批量报告，均可直接序列化为 JSON 返回给前端。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::credential::MaskedNode;
use super::error::{ErrorKind, SessionError};

/// 远端命令的原始输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出（按行，保留换行符）
    pub stdout: Vec<String>,
    /// 标准错误（按行，保留换行符）
    pub stderr: Vec<String>,
    /// 远端退出码（远端未报告时为 None）
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// 从原始字节构造，行序与远端输出一致
    pub fn from_bytes(stdout: &[u8], stderr: &[u8], exit_status: Option<u32>) -> Self {
        Self {
            stdout: split_lines(stdout),
            stderr: split_lines(stderr),
            exit_status,
        }
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split_inclusive('\n')
        .map(str::to_string)
        .collect()
}

/// 秒数保留两位小数
pub fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

/// 单主机执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    #[serde(flatten)]
    pub node: MaskedNode,
    pub success: bool,
    /// 耗时（秒），从连接前到完成或失败
    pub time_elapsed: f64,
    pub output: Vec<String>,
    pub error: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<u32>,
}

impl CommandOutcome {
    /// 创建成功结果
    pub fn succeeded(node: MaskedNode, output: CommandOutput, elapsed: Duration) -> Self {
        Self {
            node,
            success: true,
            time_elapsed: round_secs(elapsed),
            output: output.stdout,
            error: output.stderr,
            error_kind: None,
            exit_status: output.exit_status,
        }
    }

    /// 创建失败结果
    pub fn failed(node: MaskedNode, error: &SessionError, elapsed: Duration) -> Self {
        Self {
            node,
            success: false,
            time_elapsed: round_secs(elapsed),
            output: Vec::new(),
            error: vec![error.to_string()],
            error_kind: Some(error.kind()),
            exit_status: None,
        }
    }

    /// 执行单元异常退出（不应发生，但结果槽位不能留空）
    pub fn aborted(node: MaskedNode, reason: &str) -> Self {
        Self {
            node,
            success: false,
            time_elapsed: 0.0,
            output: Vec::new(),
            error: vec![format!("execution aborted: {}", reason)],
            error_kind: None,
            exit_status: None,
        }
    }
}

/// 批量执行报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// 实际执行的命令文本（多行以换行连接）
    pub cmds: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 与输入顺序一致
    pub results: Vec<CommandOutcome>,
}

impl BatchReport {
    pub fn new(cmds: String, started_at: DateTime<Utc>, results: Vec<CommandOutcome>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            cmds,
            started_at,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// 单主机测试结果（`/api/ssh/test` 的返回结构）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTestResult {
    pub time_elapsed: f64,
    pub success: bool,
    pub output: Vec<String>,
    pub error: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub node: MaskedNode,
    pub cmds: String,
}

impl NodeTestResult {
    pub fn from_outcome(outcome: CommandOutcome, cmds: String) -> Self {
        Self {
            time_elapsed: outcome.time_elapsed,
            success: outcome.success,
            output: outcome.output,
            error: outcome.error,
            error_kind: outcome.error_kind,
            node: outcome.node,
            cmds,
        }
    }
}
