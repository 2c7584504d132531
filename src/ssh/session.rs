//! SSH 会话
//!
//! 使用 russh 建立真实连接：认证、exec 通道执行命令、打开 PTY 交互通道。
//! 每个会话只属于一次操作，用完即关，不做连接池。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config};
use russh::{Channel, ChannelMsg};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use secrecy::ExposeSecret;
use sha2::Digest;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::credential::{Credential, HostKeyVerification, SshAuth};
use super::error::SessionError;
use super::outcome::CommandOutput;
use super::pty::{PtyChannel, PtyCommand, PtyEndpoint, TerminalSize};

/// 通道请求等待远端应答的上限
const CHANNEL_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// 断开连接的等待上限
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// PTY 两个方向的缓冲深度（以消息计）
const PTY_BUFFER: usize = 256;

/// 调用方包在 [`SessionConnector::open`] 外层的时限余量。
/// `open` 自己按阶段区分连接超时与认证超时，外层只兜底不守约的实现。
pub const OPEN_GRACE: Duration = Duration::from_millis(500);

/// 会话建立器
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// 建立连接并完成认证
    async fn open(
        &self,
        credential: &Credential,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, SessionError>;
}

/// 已认证的远端会话
#[async_trait]
pub trait RemoteSession: Send {
    /// 通过 exec 通道执行命令（不分配 PTY）
    async fn run_command(
        &mut self,
        command: &str,
        exec_timeout: Duration,
    ) -> Result<CommandOutput, SessionError>;

    /// 打开带 PTY 的交互 shell 通道
    async fn open_interactive_channel(
        &mut self,
        size: TerminalSize,
    ) -> Result<PtyChannel, SessionError>;

    /// 关闭底层连接，可重复调用
    async fn close(&mut self);
}

/// 基于 russh 的会话建立器
#[derive(Clone)]
pub struct SshConnector {
    verification: HostKeyVerification,
    known_hosts: Arc<HashMap<String, String>>,
    term: String,
}

impl SshConnector {
    pub fn new(
        verification: HostKeyVerification,
        known_hosts: HashMap<String, String>,
        term: impl Into<String>,
    ) -> Self {
        Self {
            verification,
            known_hosts: Arc::new(known_hosts),
            term: term.into(),
        }
    }

    /// 从应用配置创建（读取 known_hosts 文件）
    pub async fn from_config(config: &crate::config::SshConfig) -> Self {
        let verification = config
            .host_key_verification
            .parse::<HostKeyVerification>()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Invalid host_key_verification, falling back to accept");
                HostKeyVerification::Accept
            });

        let known_hosts = match &config.known_hosts_file {
            Some(path) => load_known_hosts_file(path).await,
            None => HashMap::new(),
        };

        if verification == HostKeyVerification::Strict && known_hosts.is_empty() {
            warn!("Strict host key verification without known hosts: every connection will be rejected");
        }

        Self::new(verification, known_hosts, config.term.clone())
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn open(
        &self,
        credential: &Credential,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let target = credential.target();
        debug!(target = %target, "Opening SSH session");

        let client_config = Arc::new(Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });

        let handler = HostKeyHandler {
            verification: self.verification,
            known_hosts: self.known_hosts.clone(),
            host: credential.host().to_string(),
            port: credential.port(),
        };

        let deadline = Instant::now() + connect_timeout;

        let mut handle = timeout_at(
            deadline,
            client::connect(
                client_config,
                (credential.host().to_string(), credential.port()),
                handler,
            ),
        )
        .await
        .map_err(|_| SessionError::connect_timeout(&target, connect_timeout))?
        .map_err(|e| {
            error!(target = %target, error = %e, "SSH connection failed");
            classify_connect_error(&target, e)
        })?;

        let authenticated = timeout_at(deadline, authenticate(&mut handle, credential))
            .await
            .map_err(|_| {
                SessionError::Protocol(format!("authentication with {} timed out", target))
            })??;

        if !authenticated {
            warn!(target = %target, "SSH authentication rejected");
            let _ = timeout(
                DISCONNECT_TIMEOUT,
                handle.disconnect(russh::Disconnect::ByApplication, "", "English"),
            )
            .await;
            return Err(SessionError::Auth(format!(
                "authentication rejected for {}",
                target
            )));
        }

        info!(target = %target, "SSH session established");

        Ok(Box::new(SshSession {
            handle: Some(handle),
            target,
            term: self.term.clone(),
        }))
    }
}

async fn authenticate(
    handle: &mut client::Handle<HostKeyHandler>,
    credential: &Credential,
) -> Result<bool, SessionError> {
    match credential.auth() {
        SshAuth::Password { password } => handle
            .authenticate_password(credential.username(), password.expose_secret().as_str())
            .await
            .map_err(|e| SessionError::Protocol(format!("password authentication failed: {}", e))),
        SshAuth::Key {
            private_key,
            passphrase,
        } => {
            let key = russh_keys::decode_secret_key(
                private_key.expose_secret(),
                passphrase.as_ref().map(|p| p.expose_secret().as_str()),
            )
            .map_err(|e| {
                error!(error = %e, "Failed to decode SSH private key");
                SessionError::Auth(format!("unusable private key: {}", e))
            })?;

            handle
                .authenticate_publickey(credential.username(), Arc::new(key))
                .await
                .map_err(|e| {
                    SessionError::Protocol(format!("public key authentication failed: {}", e))
                })
        }
    }
}

/// 将 russh 连接错误归类
fn classify_connect_error(target: &str, err: russh::Error) -> SessionError {
    match err {
        russh::Error::IO(e) => SessionError::Connect(format!("{} unreachable: {}", target, e)),
        russh::Error::UnknownKey => {
            SessionError::Protocol(format!("host key verification failed for {}", target))
        }
        other => SessionError::Protocol(format!("SSH handshake with {} failed: {}", target, other)),
    }
}

/// 基于 russh 的已认证会话
pub struct SshSession {
    handle: Option<client::Handle<HostKeyHandler>>,
    target: String,
    term: String,
}

impl SshSession {
    fn handle(&self) -> Result<&client::Handle<HostKeyHandler>, SessionError> {
        self.handle
            .as_ref()
            .ok_or_else(|| SessionError::Channel(format!("session to {} already closed", self.target)))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run_command(
        &mut self,
        command: &str,
        exec_timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        debug!(target = %self.target, command = %command, "Executing SSH command");

        let mut channel = self.handle()?.channel_open_session().await.map_err(|e| {
            error!(error = %e, "Failed to open exec channel");
            SessionError::Channel(format!("failed to open exec channel: {}", e))
        })?;

        channel.exec(true, command).await.map_err(|e| {
            error!(error = %e, "Exec request failed");
            SessionError::Channel(format!("exec request failed: {}", e))
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        let deadline = Instant::now() + exec_timeout;

        loop {
            match timeout_at(deadline, channel.wait()).await {
                Ok(Some(ChannelMsg::Data { ref data })) => {
                    stdout.extend_from_slice(data);
                }
                Ok(Some(ChannelMsg::ExtendedData { ref data, ext })) => {
                    // SSH_EXTENDED_DATA_STDERR
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                Ok(Some(ChannelMsg::ExitStatus { exit_status: code })) => {
                    exit_status = Some(code);
                }
                Ok(Some(ChannelMsg::Failure)) => {
                    let _ = channel.close().await;
                    return Err(SessionError::Channel("remote refused exec request".to_string()));
                }
                Ok(Some(ChannelMsg::Eof)) if exit_status.is_some() => break,
                Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
                Ok(Some(_)) => {}
                Err(_) => {
                    warn!(target = %self.target, "Command execution timed out");
                    let _ = channel.close().await;
                    return Err(SessionError::ExecTimeout(exec_timeout));
                }
            }
        }

        let _ = channel.close().await;

        info!(
            target = %self.target,
            exit_status = ?exit_status,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Command executed"
        );

        Ok(CommandOutput::from_bytes(&stdout, &stderr, exit_status))
    }

    async fn open_interactive_channel(
        &mut self,
        size: TerminalSize,
    ) -> Result<PtyChannel, SessionError> {
        let mut channel = self.handle()?.channel_open_session().await.map_err(|e| {
            error!(error = %e, "Failed to open interactive channel");
            SessionError::Channel(format!("failed to open interactive channel: {}", e))
        })?;

        channel
            .request_pty(true, &self.term, size.cols.into(), size.rows.into(), 0, 0, &[])
            .await
            .map_err(|e| SessionError::Channel(format!("pty request failed: {}", e)))?;
        await_channel_reply(&mut channel, "pty request").await?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| SessionError::Channel(format!("shell request failed: {}", e)))?;
        await_channel_reply(&mut channel, "shell request").await?;

        info!(target = %self.target, rows = size.rows, cols = size.cols, "Interactive channel opened");

        let (pty, endpoint) = PtyChannel::pair(PTY_BUFFER);
        tokio::spawn(pump_pty_channel(channel, endpoint, self.target.clone()));
        Ok(pty)
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            match timeout(
                DISCONNECT_TIMEOUT,
                handle.disconnect(russh::Disconnect::ByApplication, "", "English"),
            )
            .await
            {
                Ok(Ok(())) => debug!(target = %self.target, "SSH session closed"),
                Ok(Err(e)) => debug!(target = %self.target, error = %e, "SSH disconnect failed"),
                Err(_) => warn!(target = %self.target, "SSH disconnect timed out"),
            }
        }
    }
}

/// 等待通道请求的应答
async fn await_channel_reply(
    channel: &mut Channel<client::Msg>,
    request: &str,
) -> Result<(), SessionError> {
    loop {
        match timeout(CHANNEL_REPLY_TIMEOUT, channel.wait()).await {
            Ok(Some(ChannelMsg::Success)) => return Ok(()),
            Ok(Some(ChannelMsg::Failure)) => {
                return Err(SessionError::Channel(format!("remote refused {}", request)))
            }
            Ok(Some(ChannelMsg::Close)) | Ok(None) => {
                return Err(SessionError::Channel(format!(
                    "channel closed while waiting for {}",
                    request
                )))
            }
            Ok(Some(_)) => {}
            Err(_) => {
                return Err(SessionError::Protocol(format!("no reply to {}", request)));
            }
        }
    }
}

/// PTY 泵：独占 russh 通道，把远端输出送到读端，把写端指令送到远端
///
/// 写端关闭信号在任何等待点都会生效，包括远端窗口耗尽时阻塞的写入。
async fn pump_pty_channel(
    mut channel: Channel<client::Msg>,
    mut endpoint: PtyEndpoint,
    target: String,
) {
    let closed = endpoint.closed.clone();

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    tokio::select! {
                        _ = closed.cancelled() => break,
                        sent = endpoint.output.send(data.to_vec()) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!(target = %target, "Remote closed interactive channel");
                    break;
                }
                Some(_) => {}
            },
            command = endpoint.commands.recv() => match command {
                Some(PtyCommand::Input(bytes)) => {
                    tokio::select! {
                        _ = closed.cancelled() => break,
                        written = channel.data(&bytes[..]) => {
                            if let Err(e) = written {
                                warn!(target = %target, error = %e, "Failed to write to interactive channel");
                                break;
                            }
                        }
                    }
                }
                Some(PtyCommand::Resize(size)) => {
                    if let Err(e) = channel
                        .window_change(size.cols.into(), size.rows.into(), 0, 0)
                        .await
                    {
                        warn!(target = %target, error = %e, "Window change failed");
                    }
                }
                Some(PtyCommand::Close) | None => break,
            },
        }
    }

    let release = async {
        let _ = channel.eof().await;
        let _ = channel.close().await;
    };
    if timeout(DISCONNECT_TIMEOUT, release).await.is_err() {
        warn!(target = %target, "Interactive channel release timed out");
    }
    debug!(target = %target, "Interactive channel released");
}

/// 主机密钥校验处理器
struct HostKeyHandler {
    verification: HostKeyVerification,
    known_hosts: Arc<HashMap<String, String>>,
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let host_key = format!("{}:{}", self.host, self.port);
        let fingerprint = fingerprint(&server_public_key.public_key_base64());

        Ok(verify_host_key(
            self.verification,
            &self.known_hosts,
            &host_key,
            &fingerprint,
        ))
    }
}

/// 公钥（base64 文本）的 SHA-256 指纹
fn fingerprint(public_key_base64: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(public_key_base64.as_bytes());
    hex::encode(hasher.finalize())
}

fn verify_host_key(
    verification: HostKeyVerification,
    known_hosts: &HashMap<String, String>,
    host_key: &str,
    fingerprint: &str,
) -> bool {
    match verification {
        HostKeyVerification::Disabled => {
            warn!(host = %host_key, "Host key verification DISABLED - accepting all keys");
            true
        }
        HostKeyVerification::Accept => match known_hosts.get(host_key) {
            Some(expected) if expected == fingerprint => {
                debug!(host = %host_key, "Host key verified");
                true
            }
            Some(expected) => {
                error!(
                    host = %host_key,
                    expected = %expected,
                    actual = %fingerprint,
                    "Host key mismatch - POSSIBLE SECURITY BREACH"
                );
                false
            }
            None => {
                info!(host = %host_key, fingerprint = %fingerprint, "Accepting unknown host key");
                true
            }
        },
        HostKeyVerification::Strict => match known_hosts.get(host_key) {
            Some(expected) if expected == fingerprint => {
                debug!(host = %host_key, "Host key verified (strict mode)");
                true
            }
            Some(expected) => {
                error!(
                    host = %host_key,
                    expected = %expected,
                    actual = %fingerprint,
                    "Host key mismatch - REJECTING CONNECTION"
                );
                false
            }
            None => {
                error!(host = %host_key, "Unknown host in strict mode - rejecting connection");
                false
            }
        },
    }
}

/// 读取 known_hosts 文件；读取失败时返回空表
pub async fn load_known_hosts_file(path: &str) -> HashMap<String, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let known_hosts = parse_known_hosts(&content);
            if known_hosts.is_empty() {
                warn!(file_path = %path, "No valid entries found in known_hosts file");
            } else {
                info!(file_path = %path, count = known_hosts.len(), "Loaded known_hosts from file");
            }
            known_hosts
        }
        Err(e) => {
            error!(error = %e, file_path = %path, "Failed to read known_hosts file");
            HashMap::new()
        }
    }
}

/// 解析 known_hosts 内容
///
/// 支持两种行格式：
/// - `host:port <sha256-hex>`
/// - OpenSSH 格式 `host[,host…] <key-type> <base64-key>`，端口写作 `[host]:port`
pub fn parse_known_hosts(content: &str) -> HashMap<String, String> {
    let mut known_hosts = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let (patterns, hash) = match parts.as_slice() {
            [host, hash] => (*host, hash.to_lowercase()),
            [host, _key_type, key, ..] => (*host, fingerprint(key)),
            _ => continue,
        };

        for pattern in patterns.split(',') {
            known_hosts.insert(normalize_host_pattern(pattern), hash.clone());
        }
    }

    known_hosts
}

fn normalize_host_pattern(pattern: &str) -> String {
    if let Some(rest) = pattern.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once("]:") {
            return format!("{}:{}", host, port);
        }
    }
    if pattern.contains(':') {
        pattern.to_string()
    } else {
        format!("{}:22", pattern)
    }
}
