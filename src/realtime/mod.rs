//! 实时交互
//! 终端会话的双向转发

pub mod terminal;

pub use terminal::{
    ClientEvent, CloseReason, ServerEvent, TerminalBridge, TerminalState, TerminalSummary,
};
