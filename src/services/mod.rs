//! 业务服务层

pub mod batch_service;
pub mod runner;

pub use batch_service::BatchService;
pub use runner::CommandRunner;
