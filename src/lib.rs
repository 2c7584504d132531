//! 批量命令执行与交互终端中继
//! 对外提供 HTTP / WebSocket 接口，核心为批量执行和终端桥接

pub mod concurrency;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod services;
pub mod ssh;
pub mod telemetry;
