//! 配置系统
//! 从环境变量加载所有配置

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::ssh::HostKeyVerification;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:18001"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// 连接与握手超时（秒）
    pub connect_timeout_secs: u64,
    /// 命令执行默认超时（秒）
    pub command_timeout_secs: u64,
    /// 请求可指定的最大超时（秒）
    pub max_command_timeout_secs: u64,
    /// 主机密钥验证策略（strict/accept/disabled）
    #[serde(default = "default_host_key_verification")]
    pub host_key_verification: String,
    /// known_hosts 文件路径（可选）
    #[serde(default)]
    pub known_hosts_file: Option<String>,
    /// 交互终端的 TERM 类型
    pub term: String,
}

/// 默认主机密钥验证策略：accept（首次连接时接受新密钥）
fn default_host_key_verification() -> String {
    "accept".to_string()
}

/// 并发控制配置
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    /// 同时连接的主机数上限（所有批量请求共享）
    pub batch_limit: usize,
    /// 同时存活的终端会话上限
    pub terminal_limit: usize,
}

impl From<&ConcurrencyConfig> for crate::concurrency::ConcurrencyConfig {
    fn from(config: &ConcurrencyConfig) -> Self {
        Self {
            batch_limit: config.batch_limit,
            terminal_limit: config.terminal_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// 允许的来源，"*" 表示任意
    pub allow_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ssh: SshConfig,
    pub concurrency: ConcurrencyConfig,
    pub cors: CorsConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:18001")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // SSH 默认配置
            .set_default("ssh.connect_timeout_secs", 5)?
            .set_default("ssh.command_timeout_secs", 60)?
            .set_default("ssh.max_command_timeout_secs", 3600)?
            .set_default("ssh.host_key_verification", "accept")?
            .set_default("ssh.term", "xterm-256color")?
            // 并发控制默认配置
            .set_default("concurrency.batch_limit", 50)?
            .set_default("concurrency.terminal_limit", 100)?
            .set_default("cors.allow_origin", "*")?;

        // 从环境变量加载配置（前缀为 MANAGI_）
        settings = settings.add_source(
            Environment::with_prefix("MANAGI")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证主机密钥策略
        self.ssh
            .host_key_verification
            .parse::<HostKeyVerification>()
            .map_err(ConfigError::Message)?;

        // 验证超时
        if self.ssh.connect_timeout_secs == 0 || self.ssh.command_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh.connect_timeout_secs and ssh.command_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.ssh.max_command_timeout_secs < self.ssh.command_timeout_secs {
            return Err(ConfigError::Message(
                "ssh.max_command_timeout_secs must be >= ssh.command_timeout_secs".to_string(),
            ));
        }

        // 验证并发限制
        for (name, limit) in [
            ("concurrency.batch_limit", self.concurrency.batch_limit),
            ("concurrency.terminal_limit", self.concurrency.terminal_limit),
        ] {
            if !(1..=1000).contains(&limit) {
                return Err(ConfigError::Message(format!(
                    "{} must be between 1 and 1000",
                    name
                )));
            }
        }

        Ok(())
    }

    /// 覆盖监听端口（命令行参数）
    pub fn override_port(&mut self, port: u16) {
        let host = self
            .server
            .addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        self.server.addr = format!("{}:{}", host, port);
    }
}
