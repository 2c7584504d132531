//! HTTP / WebSocket 处理器

pub mod health;
pub mod ssh;
pub mod terminal;
