//! 单主机命令执行
//!
//! 连接、认证、执行、关闭；任何失败都转成结构化结果，不向外抛错。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::ssh::{CommandOutcome, Credential, SessionConnector, SessionError, OPEN_GRACE};

/// 单主机命令执行器
#[derive(Clone)]
pub struct CommandRunner {
    connector: Arc<dyn SessionConnector>,
    connect_timeout: Duration,
}

impl CommandRunner {
    pub fn new(connector: Arc<dyn SessionConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    /// 在一台主机上执行命令
    ///
    /// 连接阶段受 `min(connect_timeout, timeout)` 约束，执行阶段使用剩余时间，
    /// 整台主机的耗时不超过 `timeout`（另加关闭连接的时间）。
    /// 远端非零退出码仍视为成功，退出码记录在结果中。
    pub async fn run(
        &self,
        credential: &Credential,
        command: &str,
        timeout_total: Duration,
    ) -> CommandOutcome {
        let node = credential.masked();
        let target = credential.target();
        let started = Instant::now();

        let result = self.execute(credential, command, timeout_total, started).await;
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                info!(
                    target = %target,
                    exit_status = ?output.exit_status,
                    elapsed_ms = elapsed.as_millis(),
                    "Host command succeeded"
                );
                metrics::counter!("batch_hosts_total", "result" => "success").increment(1);
                CommandOutcome::succeeded(node, output, elapsed)
            }
            Err(e) => {
                warn!(
                    target = %target,
                    error_kind = e.kind().as_str(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis(),
                    "Host command failed"
                );
                metrics::counter!("batch_hosts_total", "result" => e.kind().as_str()).increment(1);
                CommandOutcome::failed(node, &e, elapsed)
            }
        }
    }

    async fn execute(
        &self,
        credential: &Credential,
        command: &str,
        timeout_total: Duration,
        started: Instant,
    ) -> Result<crate::ssh::CommandOutput, SessionError> {
        let connect_timeout = self.connect_timeout.min(timeout_total);

        let mut session = timeout(
            connect_timeout + OPEN_GRACE,
            self.connector.open(credential, connect_timeout),
        )
        .await
        .map_err(|_| SessionError::connect_timeout(&credential.target(), connect_timeout))??;

        let remaining = timeout_total.saturating_sub(started.elapsed());
        let result = if remaining.is_zero() {
            Err(SessionError::ExecTimeout(timeout_total))
        } else {
            match timeout(remaining, session.run_command(command, remaining)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::ExecTimeout(timeout_total)),
            }
        };

        session.close().await;

        // 执行阶段的超时统一按整台主机的时限报告
        result.map_err(|e| match e {
            SessionError::ExecTimeout(_) => SessionError::ExecTimeout(timeout_total),
            other => other,
        })
    }
}
