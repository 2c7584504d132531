//! 交互式 PTY 通道
//!
//! 通道被拆成互不共享的两半：写端（输入、调整尺寸、关闭）和读端（输出字节块）。
//! 远端一侧由 [`PtyEndpoint`] 持有，负责把这两路消息接到真实通道上。
//! 关闭信号不经过指令队列：远端停止读取时队列可能已满。

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::SessionError;

/// 终端尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    pub fn is_valid(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// 写端发往远端的指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyCommand {
    /// 原始输入字节
    Input(Vec<u8>),
    /// 调整终端尺寸
    Resize(TerminalSize),
    /// 关闭通道
    Close,
}

/// 交互通道（本地一侧）
pub struct PtyChannel {
    writer: PtyWriter,
    reader: PtyReader,
}

/// 远端一侧的通道端点
pub struct PtyEndpoint {
    /// 来自写端的指令
    pub commands: mpsc::Receiver<PtyCommand>,
    /// 发往读端的输出
    pub output: mpsc::Sender<Vec<u8>>,
    /// 写端请求关闭后触发
    pub closed: CancellationToken,
}

impl PtyChannel {
    /// 创建一对相连的通道与端点
    pub fn pair(buffer: usize) -> (PtyChannel, PtyEndpoint) {
        let (command_tx, command_rx) = mpsc::channel(buffer);
        let (output_tx, output_rx) = mpsc::channel(buffer);
        let closed = CancellationToken::new();

        let channel = PtyChannel {
            writer: PtyWriter {
                tx: command_tx,
                closed: closed.clone(),
            },
            reader: PtyReader { rx: output_rx },
        };
        let endpoint = PtyEndpoint {
            commands: command_rx,
            output: output_tx,
            closed,
        };
        (channel, endpoint)
    }

    pub fn into_split(self) -> (PtyWriter, PtyReader) {
        (self.writer, self.reader)
    }
}

/// 写端
#[derive(Clone)]
pub struct PtyWriter {
    tx: mpsc::Sender<PtyCommand>,
    closed: CancellationToken,
}

impl PtyWriter {
    pub async fn write(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.send(PtyCommand::Input(data)).await
    }

    pub async fn resize(&self, size: TerminalSize) -> Result<(), SessionError> {
        self.send(PtyCommand::Resize(size)).await
    }

    /// 等待队列空位；可随时取消，取消时不会丢失指令
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, PtyCommand>, SessionError> {
        self.tx.reserve().await.map_err(|_| channel_closed())
    }

    /// 队列已满或已关闭时立即失败
    pub fn try_send(&self, command: PtyCommand) -> Result<(), SessionError> {
        self.tx.try_send(command).map_err(|_| channel_closed())
    }

    /// 请求关闭远端通道，不等待队列空位
    pub fn close(&self) {
        self.closed.cancel();
        let _ = self.tx.try_send(PtyCommand::Close);
    }

    async fn send(&self, command: PtyCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| channel_closed())
    }
}

fn channel_closed() -> SessionError {
    SessionError::Channel("pty channel closed".to_string())
}

/// 读端
pub struct PtyReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl PtyReader {
    /// 读取下一段输出；远端关闭后返回 None
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
