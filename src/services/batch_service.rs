//! 批量执行服务
//!
//! 每台主机一个任务并发执行，全部完成后按输入顺序汇总。
//! 某台主机失败只影响它自己的结果，不会提前结束整批。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use validator::Validate;

use crate::concurrency::{ConcurrencyController, ConcurrencyScope};
use crate::config::SshConfig;
use crate::error::{AppError, Result};
use crate::models::batch::{join_commands, BatchRequest, NodeTestRequest};
use crate::services::runner::CommandRunner;
use crate::ssh::{
    BatchReport, CommandOutcome, Credential, CredentialError, NodeTestResult, SessionConnector,
};

/// 批量执行服务
pub struct BatchService {
    runner: CommandRunner,
    concurrency_controller: Arc<ConcurrencyController>,
    ssh_config: SshConfig,
}

impl BatchService {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        concurrency_controller: Arc<ConcurrencyController>,
        ssh_config: SshConfig,
    ) -> Self {
        let runner = CommandRunner::new(
            connector,
            Duration::from_secs(ssh_config.connect_timeout_secs),
        );
        Self {
            runner,
            concurrency_controller,
            ssh_config,
        }
    }

    /// 解析单台主机的超时：缺省用配置值，超过上限时截断
    fn resolve_timeout(&self, requested: Option<u64>) -> Duration {
        let secs = requested
            .unwrap_or(self.ssh_config.command_timeout_secs)
            .min(self.ssh_config.max_command_timeout_secs);
        Duration::from_secs(secs)
    }

    /// 处理批量执行请求
    pub async fn execute(&self, request: BatchRequest, caller: &str) -> Result<BatchReport> {
        request.validate()?;

        let cmds = join_commands(&request.cmds)
            .ok_or_else(|| AppError::validation("cmds must contain at least one command"))?;

        let credentials = request
            .nodes
            .into_iter()
            .map(Credential::try_from)
            .collect::<std::result::Result<Vec<_>, CredentialError>>()?;

        let timeout = self.resolve_timeout(request.timeout_secs);

        info!(
            caller = %caller,
            hosts = credentials.len(),
            timeout_secs = timeout.as_secs(),
            "Starting batch execution"
        );

        self.run_batch(credentials, cmds, timeout).await
    }

    /// 在所有主机上并发执行同一段命令
    ///
    /// 返回的结果数与输入一致且顺序相同。等待并发许可的时间不计入主机耗时。
    pub async fn run_batch(
        &self,
        credentials: Vec<Credential>,
        cmds: String,
        timeout: Duration,
    ) -> Result<BatchReport> {
        if credentials.is_empty() {
            return Err(AppError::validation("nodes must not be empty"));
        }
        if cmds.trim().is_empty() {
            return Err(AppError::validation("cmds must contain at least one command"));
        }
        if timeout.is_zero() {
            return Err(AppError::validation("timeout must be greater than 0"));
        }

        let started_at = Utc::now();
        let command: Arc<str> = Arc::from(cmds.as_str());
        let mut task_handles = Vec::with_capacity(credentials.len());

        for credential in credentials {
            let masked = credential.masked();
            let runner = self.runner.clone();
            let controller = self.concurrency_controller.clone();
            let command = command.clone();

            let handle = tokio::spawn(async move {
                let _permit = match controller.acquire(ConcurrencyScope::Batch).await {
                    Ok(permit) => permit,
                    Err(e) => return CommandOutcome::aborted(credential.masked(), &e.to_string()),
                };
                runner.run(&credential, &command, timeout).await
            });

            task_handles.push((masked, handle));
        }

        // 按提交顺序等待，结果槽位与输入一一对应
        let mut results = Vec::with_capacity(task_handles.len());
        for (masked, handle) in task_handles {
            match handle.await {
                Ok(outcome) => results.push(outcome),
                Err(e) => {
                    error!(host = %masked.ip, error = %e, "Host task aborted");
                    results.push(CommandOutcome::aborted(masked, &e.to_string()));
                }
            }
        }

        let report = BatchReport::new(cmds, started_at, results);

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch execution completed"
        );

        Ok(report)
    }

    /// 单主机测试
    pub async fn test_node(
        &self,
        request: NodeTestRequest,
        caller: &str,
    ) -> Result<NodeTestResult> {
        request.validate()?;

        let cmds = join_commands(&request.cmds)
            .ok_or_else(|| AppError::validation("cmds must contain at least one command"))?;
        let credential = Credential::try_from(request.node)?;
        let timeout = self.resolve_timeout(request.timeout_secs);

        info!(caller = %caller, target = %credential.target(), "Testing SSH node");

        let _permit = self
            .concurrency_controller
            .acquire(ConcurrencyScope::Batch)
            .await?;
        let outcome = self.runner.run(&credential, &cmds, timeout).await;

        Ok(NodeTestResult::from_outcome(outcome, cmds))
    }
}
