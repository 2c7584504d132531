//! 请求模型

pub mod batch;
