//! 交互终端桥接
//!
//! 把调用方的双向消息流接到远端 PTY 上：
//! 远端输出原样转发给调用方，调用方输入原样写入远端，尺寸调整单独处理。
//! 任何一侧断开都会让两侧一起关闭。
//!
//! 状态流转：`Connecting → Active → Closing → Closed`。

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::concurrency::{ConcurrencyController, ConcurrencyScope};
use crate::config::SshConfig;
use crate::ssh::{
    Credential, PtyCommand, PtyReader, PtyWriter, RemoteSession, SessionConnector, SessionError,
    TerminalSize, OPEN_GRACE,
};

/// 关闭远端会话和调用方流各自的等待上限
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 远端不读取时最多积压的输入事件数，超出即视为远端故障
const MAX_PENDING_INPUT: usize = 1024;

/// 调用方发来的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// 原始输入字节
    Input(Vec<u8>),
    /// 调整终端尺寸
    Resize(TerminalSize),
    /// 主动关闭
    Close,
}

/// 发往调用方的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// 远端输出
    Output(Vec<u8>),
    /// 终端级错误（发送后随即关闭）
    Error(String),
}

/// 终端会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// 会话结束原因（先关闭的一侧决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// 未能建立会话或超出会话上限
    OpenFailed,
    /// 调用方请求关闭或断开
    ClientClosed,
    /// 向调用方发送失败
    ClientError,
    /// 远端通道结束
    RemoteClosed,
    /// 向远端写入失败
    RemoteError,
}

/// 会话结束后的汇总
#[derive(Debug, Clone, Serialize)]
pub struct TerminalSummary {
    pub target: String,
    pub state: TerminalState,
    pub reason: CloseReason,
    /// 最后一次生效的终端尺寸
    pub size: TerminalSize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// 单个终端会话的状态记录
struct TerminalSession {
    target: String,
    state: TerminalState,
    size: TerminalSize,
}

impl TerminalSession {
    fn transition(&mut self, next: TerminalState) {
        debug!(target = %self.target, from = ?self.state, to = ?next, "Terminal state changed");
        self.state = next;
    }

    fn summary(&self, reason: CloseReason, bytes_in: u64, bytes_out: u64) -> TerminalSummary {
        TerminalSummary {
            target: self.target.clone(),
            state: self.state,
            reason,
            size: self.size,
            bytes_in,
            bytes_out,
        }
    }
}

/// 终端桥接服务
pub struct TerminalBridge {
    connector: Arc<dyn SessionConnector>,
    concurrency_controller: Arc<ConcurrencyController>,
    connect_timeout: Duration,
}

impl TerminalBridge {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        concurrency_controller: Arc<ConcurrencyController>,
        ssh_config: SshConfig,
    ) -> Self {
        Self {
            connector,
            concurrency_controller,
            connect_timeout: Duration::from_secs(ssh_config.connect_timeout_secs),
        }
    }

    /// 运行一个终端会话直到任一侧关闭
    ///
    /// 返回时远端通道、SSH 会话和 `output` 都已各关闭一次。
    pub async fn run<I, O>(
        &self,
        credential: Credential,
        size: TerminalSize,
        mut input: I,
        mut output: O,
    ) -> TerminalSummary
    where
        I: Stream<Item = ClientEvent> + Unpin + Send,
        O: Sink<ServerEvent> + Unpin + Send,
    {
        let mut session = TerminalSession {
            target: credential.target(),
            state: TerminalState::Connecting,
            size,
        };

        // 超出会话上限直接拒绝，不排队
        let _permit = match self
            .concurrency_controller
            .try_acquire(ConcurrencyScope::Terminal)
        {
            Ok(permit) => permit,
            Err(e) => {
                metrics::counter!("terminal_sessions_total", "result" => "rejected").increment(1);
                refuse(&mut output, e.to_string()).await;
                session.transition(TerminalState::Closed);
                return session.summary(CloseReason::OpenFailed, 0, 0);
            }
        };

        let (mut remote, writer, reader) = match self.connect(&credential, size).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(target = %session.target, error = %e, "Terminal session failed to open");
                metrics::counter!("terminal_sessions_total", "result" => "failed").increment(1);
                refuse(&mut output, e.to_string()).await;
                session.transition(TerminalState::Closed);
                return session.summary(CloseReason::OpenFailed, 0, 0);
            }
        };

        metrics::counter!("terminal_sessions_total", "result" => "opened").increment(1);
        metrics::gauge!("terminal_sessions_active").increment(1.0);
        session.transition(TerminalState::Active);
        info!(target = %session.target, rows = size.rows, cols = size.cols, "Terminal session active");

        let cancel = CancellationToken::new();
        let reason = OnceLock::new();

        let (bytes_out, (bytes_in, final_size)) = tokio::join!(
            forward_remote_output(reader, &mut output, &cancel, &reason),
            forward_client_input(&mut input, &writer, size, &cancel, &reason),
        );
        session.size = final_size;

        // 两个方向都已停止，各资源只关闭一次，且都有时限
        session.transition(TerminalState::Closing);
        writer.close();
        if timeout(TEARDOWN_TIMEOUT, remote.close()).await.is_err() {
            warn!(target = %session.target, "Remote session close timed out");
        }
        if timeout(TEARDOWN_TIMEOUT, output.close()).await.is_err() {
            warn!(target = %session.target, "Client stream close timed out");
        }
        session.transition(TerminalState::Closed);
        metrics::gauge!("terminal_sessions_active").decrement(1.0);

        let reason = reason.get().copied().unwrap_or(CloseReason::ClientClosed);
        info!(
            target = %session.target,
            reason = ?reason,
            bytes_in,
            bytes_out,
            "Terminal session closed"
        );

        session.summary(reason, bytes_in, bytes_out)
    }

    async fn connect(
        &self,
        credential: &Credential,
        size: TerminalSize,
    ) -> Result<(Box<dyn RemoteSession>, PtyWriter, PtyReader), SessionError> {
        if !size.is_valid() {
            return Err(SessionError::Channel(format!(
                "invalid terminal size {}x{}",
                size.rows, size.cols
            )));
        }

        let mut remote = timeout(
            self.connect_timeout + OPEN_GRACE,
            self.connector.open(credential, self.connect_timeout),
        )
        .await
        .map_err(|_| SessionError::connect_timeout(&credential.target(), self.connect_timeout))??;

        match remote.open_interactive_channel(size).await {
            Ok(channel) => {
                let (writer, reader) = channel.into_split();
                Ok((remote, writer, reader))
            }
            Err(e) => {
                remote.close().await;
                Err(e)
            }
        }
    }
}

/// 发送一条错误事件并关闭调用方流
async fn refuse<O>(output: &mut O, message: String)
where
    O: Sink<ServerEvent> + Unpin,
{
    let _ = output.send(ServerEvent::Error(message)).await;
    let _ = output.close().await;
}

/// 远端 → 调用方
async fn forward_remote_output<O>(
    mut reader: PtyReader,
    output: &mut O,
    cancel: &CancellationToken,
    reason: &OnceLock<CloseReason>,
) -> u64
where
    O: Sink<ServerEvent> + Unpin,
{
    let mut bytes_out = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = reader.read() => match chunk {
                Some(bytes) => {
                    let len = bytes.len() as u64;
                    // 调用方不再接收时也要能响应关闭
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = output.send(ServerEvent::Output(bytes)) => {
                            if sent.is_err() {
                                let _ = reason.set(CloseReason::ClientError);
                                break;
                            }
                            bytes_out += len;
                        }
                    }
                }
                None => {
                    let _ = reason.set(CloseReason::RemoteClosed);
                    break;
                }
            },
        }
    }

    cancel.cancel();
    bytes_out
}

/// 调用方 → 远端
///
/// 写入远端与读取调用方在同一个 `select!` 中进行：远端停止读取时输入先在本地排队，
/// 调用方的关闭请求仍能及时生效。
async fn forward_client_input<I>(
    input: &mut I,
    writer: &PtyWriter,
    initial_size: TerminalSize,
    cancel: &CancellationToken,
    reason: &OnceLock<CloseReason>,
) -> (u64, TerminalSize)
where
    I: Stream<Item = ClientEvent> + Unpin,
{
    let mut bytes_in = 0u64;
    let mut size = initial_size;
    let mut pending: VecDeque<PtyCommand> = VecDeque::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = writer.reserve(), if !pending.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(command) = pending.pop_front() {
                        permit.send(command);
                    }
                }
                Err(_) => {
                    let _ = reason.set(CloseReason::RemoteError);
                    break;
                }
            },
            event = input.next() => match event {
                Some(ClientEvent::Input(bytes)) => {
                    bytes_in += bytes.len() as u64;
                    pending.push_back(PtyCommand::Input(bytes));
                }
                Some(ClientEvent::Resize(next)) => {
                    if !next.is_valid() {
                        warn!(rows = next.rows, cols = next.cols, "Ignoring invalid terminal size");
                        continue;
                    }
                    size = next;
                    pending.push_back(PtyCommand::Resize(next));
                }
                Some(ClientEvent::Close) | None => {
                    let _ = reason.set(CloseReason::ClientClosed);
                    break;
                }
            },
        }

        if pending.len() > MAX_PENDING_INPUT {
            warn!(pending = pending.len(), "Remote stopped reading terminal input");
            let _ = reason.set(CloseReason::RemoteError);
            break;
        }
    }

    // 尽量送出已排队的输入，队列满时放弃
    while let Some(command) = pending.pop_front() {
        if writer.try_send(command).is_err() {
            break;
        }
    }

    cancel.cancel();
    (bytes_in, size)
}
