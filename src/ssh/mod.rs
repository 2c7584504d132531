//! SSH 执行模块
//!
//! 凭据、会话、PTY 通道与执行结果。真实实现基于 russh，
//! `mock` 特性下提供不触碰网络的替身。

pub mod credential;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod outcome;
pub mod pty;
pub mod session;

pub use credential::{
    AuthKind, Credential, CredentialError, HostKeyVerification, MaskedNode, NodeRequest, SshAuth,
    SECRET_MASK,
};
pub use error::{ErrorKind, SessionError};
pub use outcome::{BatchReport, CommandOutcome, CommandOutput, NodeTestResult};
pub use pty::{PtyChannel, PtyCommand, PtyEndpoint, PtyReader, PtyWriter, TerminalSize};
pub use session::{
    load_known_hosts_file, parse_known_hosts, RemoteSession, SessionConnector, SshConnector,
    OPEN_GRACE,
};
