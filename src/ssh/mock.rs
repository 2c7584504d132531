//! 内存中的 SSH 会话替身
//!
//! 按主机地址配置行为（正常、不可达、认证失败、挂起……），
//! 只在单元测试和 `mock` 特性下编译，不触碰网络。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::credential::Credential;
use super::error::SessionError;
use super::outcome::CommandOutput;
use super::pty::{PtyChannel, PtyCommand, PtyEndpoint, TerminalSize};
use super::session::{RemoteSession, SessionConnector};

/// 单台模拟主机的行为
#[derive(Debug, Clone)]
pub enum MockHost {
    /// 正常应答
    Healthy {
        stdout: String,
        stderr: String,
        exit_status: u32,
        /// 命令执行耗时
        delay: Duration,
    },
    /// 连接被拒绝
    Unreachable,
    /// 凭据被拒绝
    AuthRejected,
    /// 握手失败
    HandshakeFailure,
    /// 认证阶段挂起，直到连接时限才报告
    AuthStall,
    /// 连接成功，但命令永不返回
    Hang,
    /// 交互通道打开后从不读取输入（远端窗口耗尽）
    Stalled,
    /// 交互 shell 输出一段文字后自行退出
    Exiting { output: String },
    /// 连接阶段永不返回
    Blackhole,
    /// 连接成功，但拒绝打开通道
    ChannelRefused,
}

impl MockHost {
    /// 立即返回给定输出、退出码为 0
    pub fn responding(stdout: impl Into<String>) -> Self {
        MockHost::Healthy {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
            delay: Duration::ZERO,
        }
    }

    /// 耗时 `delay` 后返回给定输出
    pub fn slow(stdout: impl Into<String>, delay: Duration) -> Self {
        MockHost::Healthy {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
            delay,
        }
    }
}

/// 模拟会话的观测记录
#[derive(Debug, Default)]
pub struct MockRecorder {
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    channels_closed: AtomicUsize,
    commands: Mutex<Vec<String>>,
    resizes: Mutex<Vec<TerminalSize>>,
    input: Mutex<Vec<u8>>,
}

impl MockRecorder {
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.channels_closed.load(Ordering::SeqCst)
    }

    /// 已执行的命令文本
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 收到的尺寸调整
    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.resizes.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 交互通道收到的全部输入
    pub fn input(&self) -> Vec<u8> {
        self.input.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

/// 模拟会话建立器
#[derive(Clone, Default)]
pub struct MockConnector {
    hosts: Arc<HashMap<String, MockHost>>,
    recorder: Arc<MockRecorder>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为主机地址配置行为；未配置的主机视为不可达
    pub fn with_host(mut self, host: impl Into<String>, behaviour: MockHost) -> Self {
        Arc::make_mut(&mut self.hosts).insert(host.into(), behaviour);
        self
    }

    pub fn recorder(&self) -> Arc<MockRecorder> {
        self.recorder.clone()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn open(
        &self,
        credential: &Credential,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let target = credential.target();
        let behaviour = self
            .hosts
            .get(credential.host())
            .cloned()
            .unwrap_or(MockHost::Unreachable);

        match behaviour {
            MockHost::Unreachable => {
                Err(SessionError::Connect(format!("{} unreachable: connection refused", target)))
            }
            MockHost::AuthRejected => Err(SessionError::Auth(format!(
                "authentication rejected for {}",
                target
            ))),
            MockHost::HandshakeFailure => Err(SessionError::Protocol(format!(
                "SSH handshake with {} failed: unexpected banner",
                target
            ))),
            MockHost::Blackhole => {
                tokio::time::sleep(connect_timeout).await;
                Err(SessionError::connect_timeout(&target, connect_timeout))
            }
            MockHost::AuthStall => {
                tokio::time::sleep(connect_timeout).await;
                Err(SessionError::Protocol(format!(
                    "authentication with {} timed out",
                    target
                )))
            }
            behaviour => {
                self.recorder.sessions_opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockSession {
                    behaviour,
                    recorder: self.recorder.clone(),
                    closed: false,
                }))
            }
        }
    }
}

struct MockSession {
    behaviour: MockHost,
    recorder: Arc<MockRecorder>,
    closed: bool,
}

impl MockSession {
    /// 指令队列只有 4 格且从不消费，只响应关闭信号
    fn stalled_channel(&self) -> PtyChannel {
        let (channel, endpoint) = PtyChannel::pair(4);
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            let PtyEndpoint {
                commands: _commands,
                output: _output,
                closed,
            } = endpoint;
            closed.cancelled().await;
            recorder.channels_closed.fetch_add(1, Ordering::SeqCst);
        });
        channel
    }

    /// 写出 `output` 后结束通道
    fn exiting_channel(&self, output: String) -> PtyChannel {
        let (channel, endpoint) = PtyChannel::pair(4);
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            let _ = endpoint.output.send(output.into_bytes()).await;
            recorder.channels_closed.fetch_add(1, Ordering::SeqCst);
        });
        channel
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run_command(
        &mut self,
        command: &str,
        exec_timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        if let Ok(mut commands) = self.recorder.commands.lock() {
            commands.push(command.to_string());
        }

        match &self.behaviour {
            MockHost::Healthy {
                stdout,
                stderr,
                exit_status,
                delay,
            } => {
                if *delay > exec_timeout {
                    tokio::time::sleep(exec_timeout).await;
                    return Err(SessionError::ExecTimeout(exec_timeout));
                }
                tokio::time::sleep(*delay).await;
                Ok(CommandOutput::from_bytes(
                    stdout.as_bytes(),
                    stderr.as_bytes(),
                    Some(*exit_status),
                ))
            }
            MockHost::Exiting { output } => Ok(CommandOutput::from_bytes(
                output.as_bytes(),
                b"",
                Some(0),
            )),
            MockHost::Hang | MockHost::Stalled => {
                tokio::time::sleep(exec_timeout).await;
                Err(SessionError::ExecTimeout(exec_timeout))
            }
            _ => Err(SessionError::Channel("remote refused exec request".to_string())),
        }
    }

    async fn open_interactive_channel(
        &mut self,
        _size: TerminalSize,
    ) -> Result<PtyChannel, SessionError> {
        let reply = match &self.behaviour {
            MockHost::Healthy { stdout, .. } => stdout.clone().into_bytes(),
            MockHost::Hang => Vec::new(),
            MockHost::Stalled => return Ok(self.stalled_channel()),
            MockHost::Exiting { output } => return Ok(self.exiting_channel(output.clone())),
            _ => return Err(SessionError::Channel("remote refused shell request".to_string())),
        };

        let (channel, mut endpoint) = PtyChannel::pair(64);
        let recorder = self.recorder.clone();

        // 回显输入；每遇到换行再写出主机的应答。排队的指令先于关闭信号处理
        tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    biased;
                    command = endpoint.commands.recv() => command,
                    _ = endpoint.closed.cancelled() => None,
                };
                match command {
                    Some(PtyCommand::Input(bytes)) => {
                        if let Ok(mut input) = recorder.input.lock() {
                            input.extend_from_slice(&bytes);
                        }
                        let newline = bytes.contains(&b'\n') || bytes.contains(&b'\r');
                        if endpoint.output.send(bytes).await.is_err() {
                            break;
                        }
                        if newline
                            && !reply.is_empty()
                            && endpoint.output.send(reply.clone()).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(PtyCommand::Resize(size)) => {
                        if let Ok(mut resizes) = recorder.resizes.lock() {
                            resizes.push(size);
                        }
                    }
                    Some(PtyCommand::Close) | None => break,
                }
            }
            recorder.channels_closed.fetch_add(1, Ordering::SeqCst);
        });

        Ok(channel)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.recorder.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
