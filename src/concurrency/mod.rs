//! 并发控制模块
//!
//! 两个互相独立的作用域：
//! - 批量执行：同时连接的主机数上限，超限时排队等待
//! - 交互终端：同时存活的终端会话上限，超限时立即拒绝

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// 作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    /// 批量执行（等待策略）
    Batch,
    /// 交互终端（拒绝策略）
    Terminal,
}

impl ConcurrencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyScope::Batch => "batch",
            ConcurrencyScope::Terminal => "terminal",
        }
    }
}

/// 并发许可，释放时归还名额
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

/// 并发配置
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// 同时执行的主机数上限（所有批量请求共享）
    pub batch_limit: usize,
    /// 同时存活的终端会话上限
    pub terminal_limit: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            terminal_limit: 100,
        }
    }
}

/// 并发错误
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("Semaphore closed")]
    Closed,

    /// 拒绝策略：立即拒绝（达到并发上限）
    #[error("Request rejected due to concurrency limit: {scope} (limit: {limit})")]
    Rejected { scope: &'static str, limit: usize },
}

/// 并发控制器
#[derive(Clone)]
pub struct ConcurrencyController {
    batch_semaphore: Arc<Semaphore>,
    terminal_semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
}

impl ConcurrencyController {
    /// 创建新的并发控制器
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            batch_semaphore: Arc::new(Semaphore::new(config.batch_limit.max(1))),
            terminal_semaphore: Arc::new(Semaphore::new(config.terminal_limit.max(1))),
            config,
        }
    }

    fn semaphore(&self, scope: ConcurrencyScope) -> &Arc<Semaphore> {
        match scope {
            ConcurrencyScope::Batch => &self.batch_semaphore,
            ConcurrencyScope::Terminal => &self.terminal_semaphore,
        }
    }

    fn limit(&self, scope: ConcurrencyScope) -> usize {
        match scope {
            ConcurrencyScope::Batch => self.config.batch_limit.max(1),
            ConcurrencyScope::Terminal => self.config.terminal_limit.max(1),
        }
    }

    /// 等待直到获得许可
    pub async fn acquire(
        &self,
        scope: ConcurrencyScope,
    ) -> Result<ConcurrencyPermit, ConcurrencyError> {
        let permit = self
            .semaphore(scope)
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConcurrencyError::Closed)?;

        debug!(scope = scope.as_str(), "Concurrency permit acquired");

        Ok(ConcurrencyPermit { _permit: permit })
    }

    /// 非阻塞尝试获取许可
    pub fn try_acquire(
        &self,
        scope: ConcurrencyScope,
    ) -> Result<ConcurrencyPermit, ConcurrencyError> {
        match self.semaphore(scope).clone().try_acquire_owned() {
            Ok(permit) => {
                debug!(scope = scope.as_str(), "Concurrency permit acquired (non-blocking)");
                Ok(ConcurrencyPermit { _permit: permit })
            }
            Err(tokio::sync::TryAcquireError::Closed) => Err(ConcurrencyError::Closed),
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                let limit = self.limit(scope);
                warn!(scope = scope.as_str(), limit, "Concurrency limit reached, rejecting");
                Err(ConcurrencyError::Rejected {
                    scope: scope.as_str(),
                    limit,
                })
            }
        }
    }

    /// 获取当前并发统计
    pub fn get_stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            batch: self.scope_stats(ConcurrencyScope::Batch),
            terminal: self.scope_stats(ConcurrencyScope::Terminal),
        }
    }

    fn scope_stats(&self, scope: ConcurrencyScope) -> ScopeConcurrencyStats {
        let limit = self.limit(scope);
        let available = self.semaphore(scope).available_permits();
        let used = limit.saturating_sub(available);
        ScopeConcurrencyStats {
            limit,
            used,
            available,
            utilization_percent: (used as f64 / limit as f64 * 100.0) as f32,
        }
    }
}

/// 并发统计
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConcurrencyStats {
    pub batch: ScopeConcurrencyStats,
    pub terminal: ScopeConcurrencyStats,
}

/// 作用域级别的并发统计
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScopeConcurrencyStats {
    pub limit: usize,
    pub used: usize,
    pub available: usize,
    pub utilization_percent: f32,
}
