//! 主机凭据模型
//!
//! 目标主机的地址与认证材料。必填字段在构造时校验，
//! 认证密钥只在认证那一刻暴露，任何输出中都以 `***` 代替。

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 输出中替代认证密钥的固定掩码
pub const SECRET_MASK: &str = "***";

/// 主机密钥验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：未知主机直接接受，已知主机必须匹配
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于开发/测试）
    Disabled,
}

impl FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// 认证类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// 密码认证
    Password,
    /// 私钥认证
    Key,
}

impl FromStr for AuthKind {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "password" => Ok(Self::Password),
            "key" | "private_key" | "private-key" => Ok(Self::Key),
            other => Err(CredentialError::UnsupportedAuthKind(other.to_string())),
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKind::Password => write!(f, "password"),
            AuthKind::Key => write!(f, "key"),
        }
    }
}

/// SSH 认证材料
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// 密码认证
    Password { password: Secret<String> },
    /// 私钥认证
    Key {
        /// 私钥内容（OpenSSH / PEM 格式）
        private_key: Secret<String>,
        /// 私钥密码（如果有）
        passphrase: Option<Secret<String>>,
    },
}

impl SshAuth {
    pub fn kind(&self) -> AuthKind {
        match self {
            SshAuth::Password { .. } => AuthKind::Password,
            SshAuth::Key { .. } => AuthKind::Key,
        }
    }

    fn secret_is_empty(&self) -> bool {
        match self {
            SshAuth::Password { password } => password.expose_secret().is_empty(),
            SshAuth::Key { private_key, .. } => private_key.expose_secret().trim().is_empty(),
        }
    }
}

/// 凭据构造错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("host must not be empty")]
    MissingHost,

    #[error("ssh_username must not be empty")]
    MissingUsername,

    #[error("auth_value must not be empty")]
    MissingSecret,

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("auth_type must be given (or password / privateKey)")]
    MissingAuthKind,

    #[error("unsupported auth_type: {0} (expected password or key)")]
    UnsupportedAuthKind(String),
}

/// 目标主机凭据
///
/// 构造后不可变，由单次操作的调用方独占持有，核心不做缓存。
#[derive(Debug, Clone)]
pub struct Credential {
    name: String,
    host: String,
    port: u16,
    username: String,
    auth: SshAuth,
}

impl Credential {
    /// 创建凭据并校验必填字段
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: SshAuth,
    ) -> Result<Self, CredentialError> {
        let host = host.into().trim().to_string();
        let username = username.into().trim().to_string();
        let name = name.into().trim().to_string();

        if host.is_empty() {
            return Err(CredentialError::MissingHost);
        }
        if username.is_empty() {
            return Err(CredentialError::MissingUsername);
        }
        if port == 0 {
            return Err(CredentialError::InvalidPort);
        }
        if auth.secret_is_empty() {
            return Err(CredentialError::MissingSecret);
        }

        // 未提供显示名时沿用主机地址
        let name = if name.is_empty() { host.clone() } else { name };

        Ok(Self {
            name,
            host,
            port,
            username,
            auth,
        })
    }

    /// 创建使用密码认证的凭据
    pub fn with_password(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        Self::new(
            name,
            host,
            port,
            username,
            SshAuth::Password {
                password: Secret::new(password.into()),
            },
        )
    }

    /// 创建使用私钥认证的凭据
    pub fn with_key(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        private_key: impl Into<String>,
        passphrase: Option<String>,
    ) -> Result<Self, CredentialError> {
        Self::new(
            name,
            host,
            port,
            username,
            SshAuth::Key {
                private_key: Secret::new(private_key.into()),
                passphrase: passphrase.map(Secret::new),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn auth(&self) -> &SshAuth {
        &self.auth
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// 生成可回显的主机标识（密钥已脱敏）
    pub fn masked(&self) -> MaskedNode {
        MaskedNode {
            name: self.name.clone(),
            ip: self.host.clone(),
            port: self.port,
            ssh_username: self.username.clone(),
            auth_type: self.auth.kind(),
            auth_value: SECRET_MASK.to_string(),
        }
    }
}

/// 脱敏后的主机标识，出现在所有结果中
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedNode {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub ssh_username: String,
    pub auth_type: AuthKind,
    pub auth_value: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// 请求中的节点描述（字段名沿用前端约定）
///
/// 认证材料有两种写法：`auth_type` + `auth_value`，
/// 或终端客户端使用的 `password` / `privateKey`。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "host")]
    pub ip: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(alias = "username")]
    pub ssh_username: String,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing)]
    pub auth_value: Option<Secret<String>>,
    #[serde(default, skip_serializing)]
    pub password: Option<Secret<String>>,
    /// 私钥内容，不按服务端文件路径读取
    #[serde(default, rename = "privateKey", skip_serializing)]
    pub private_key: Option<Secret<String>>,
    /// 私钥密码（仅私钥认证）
    #[serde(default, skip_serializing)]
    pub passphrase: Option<Secret<String>>,
}

impl NodeRequest {
    /// 解析认证方式；显式的 `auth_type` 优先，其次私钥，最后密码
    fn resolve_auth(self) -> Result<SshAuth, CredentialError> {
        let (kind, secret) = match (self.auth_type, self.auth_value) {
            (Some(auth_type), value) => (
                auth_type.parse::<AuthKind>()?,
                value.ok_or(CredentialError::MissingSecret)?,
            ),
            (None, Some(_)) => return Err(CredentialError::MissingAuthKind),
            (None, None) => match (self.private_key, self.password) {
                (Some(key), _) => (AuthKind::Key, key),
                (None, Some(password)) => (AuthKind::Password, password),
                (None, None) => return Err(CredentialError::MissingAuthKind),
            },
        };

        Ok(match kind {
            AuthKind::Password => SshAuth::Password { password: secret },
            AuthKind::Key => SshAuth::Key {
                private_key: secret,
                passphrase: self.passphrase,
            },
        })
    }
}

impl TryFrom<NodeRequest> for Credential {
    type Error = CredentialError;

    fn try_from(mut node: NodeRequest) -> Result<Self, Self::Error> {
        let name = node.name.take().unwrap_or_default();
        let host = std::mem::take(&mut node.ip);
        let username = std::mem::take(&mut node.ssh_username);
        let port = node.port;
        let auth = node.resolve_auth()?;

        Credential::new(name, host, port, username, auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_json(auth_type: &str, secret: &str) -> String {
        format!(
            r#"{{"name":"web-1","ip":"10.0.0.5","ssh_username":"root","auth_type":"{}","auth_value":"{}"}}"#,
            auth_type, secret
        )
    }

    #[test]
    fn test_host_key_verification_from_str() {
        assert_eq!("strict".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Strict);
        assert_eq!("ACCEPT".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Accept);
        assert_eq!("none".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Disabled);
        assert!("sometimes".parse::<HostKeyVerification>().is_err());
    }

    #[test]
    fn test_auth_kind_aliases() {
        assert_eq!("password".parse::<AuthKind>().unwrap(), AuthKind::Password);
        assert_eq!("key".parse::<AuthKind>().unwrap(), AuthKind::Key);
        assert_eq!("private_key".parse::<AuthKind>().unwrap(), AuthKind::Key);
        assert_eq!(
            "kerberos".parse::<AuthKind>().unwrap_err(),
            CredentialError::UnsupportedAuthKind("kerberos".to_string())
        );
    }

    #[test]
    fn test_credential_mandatory_fields() {
        assert_eq!(
            Credential::with_password("a", " ", 22, "root", "pw").unwrap_err(),
            CredentialError::MissingHost
        );
        assert_eq!(
            Credential::with_password("a", "h", 22, "", "pw").unwrap_err(),
            CredentialError::MissingUsername
        );
        assert_eq!(
            Credential::with_password("a", "h", 0, "root", "pw").unwrap_err(),
            CredentialError::InvalidPort
        );
        assert_eq!(
            Credential::with_password("a", "h", 22, "root", "").unwrap_err(),
            CredentialError::MissingSecret
        );
        assert_eq!(
            Credential::with_key("a", "h", 22, "root", "  \n", None).unwrap_err(),
            CredentialError::MissingSecret
        );
    }

    #[test]
    fn test_name_defaults_to_host() {
        let credential = Credential::with_password("", "10.0.0.9", 22, "root", "pw").unwrap();
        assert_eq!(credential.name(), "10.0.0.9");
        assert_eq!(credential.target(), "root@10.0.0.9:22");
    }

    #[test]
    fn test_masked_node_hides_secret() {
        let credential =
            Credential::with_password("db", "10.0.0.7", 2222, "admin", "hunter2").unwrap();
        let masked = credential.masked();
        assert_eq!(masked.auth_value, SECRET_MASK);
        assert_eq!(masked.port, 2222);

        let json = serde_json::to_string(&masked).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"auth_type\":\"password\""));
    }

    #[test]
    fn test_debug_output_hides_secret() {
        let credential =
            Credential::with_key("k", "h", 22, "root", "-----BEGIN KEY-----", Some("pp".into()))
                .unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("BEGIN KEY"));
        assert!(!debug.contains("\"pp\""));
    }

    #[test]
    fn test_node_request_conversion() {
        let node: NodeRequest = serde_json::from_str(&node_json("password", "pw")).unwrap();
        assert_eq!(node.port, 22);

        let credential = Credential::try_from(node).unwrap();
        assert_eq!(credential.name(), "web-1");
        assert_eq!(credential.auth().kind(), AuthKind::Password);

        let node: NodeRequest = serde_json::from_str(&node_json("key", "KEYDATA")).unwrap();
        let credential = Credential::try_from(node).unwrap();
        assert_eq!(credential.auth().kind(), AuthKind::Key);
    }

    #[test]
    fn test_node_request_rejects_unknown_auth_type() {
        let node: NodeRequest = serde_json::from_str(&node_json("token", "x")).unwrap();
        assert!(matches!(
            Credential::try_from(node),
            Err(CredentialError::UnsupportedAuthKind(_))
        ));
    }

    #[test]
    fn test_terminal_client_fields() {
        let node: NodeRequest = serde_json::from_str(
            r#"{"host":"10.0.0.5","port":2222,"username":"root","password":"hunter2"}"#,
        )
        .unwrap();
        let credential = Credential::try_from(node).unwrap();
        assert_eq!(credential.auth().kind(), AuthKind::Password);
        assert_eq!(credential.target(), "root@10.0.0.5:2222");
        assert!(matches!(
            credential.auth(),
            SshAuth::Password { password } if password.expose_secret() == "hunter2"
        ));

        // 同时给出时私钥优先
        let node: NodeRequest = serde_json::from_str(
            r#"{"host":"h","username":"root","password":"pw","privateKey":"KEYDATA","passphrase":"pp"}"#,
        )
        .unwrap();
        let credential = Credential::try_from(node).unwrap();
        match credential.auth() {
            SshAuth::Key { private_key, passphrase } => {
                assert_eq!(private_key.expose_secret(), "KEYDATA");
                assert_eq!(passphrase.as_ref().map(|p| p.expose_secret().as_str()), Some("pp"));
            }
            other => panic!("expected key auth, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_explicit_auth_type_wins() {
        let node: NodeRequest = serde_json::from_str(
            r#"{"ip":"h","ssh_username":"root","auth_type":"key","auth_value":"K","password":"pw"}"#,
        )
        .unwrap();
        assert_eq!(Credential::try_from(node).unwrap().auth().kind(), AuthKind::Key);
    }

    #[test]
    fn test_missing_auth_material() {
        let node: NodeRequest =
            serde_json::from_str(r#"{"ip":"h","ssh_username":"root"}"#).unwrap();
        assert_eq!(Credential::try_from(node).unwrap_err(), CredentialError::MissingAuthKind);

        let node: NodeRequest =
            serde_json::from_str(r#"{"ip":"h","ssh_username":"root","auth_value":"pw"}"#)
                .unwrap();
        assert_eq!(Credential::try_from(node).unwrap_err(), CredentialError::MissingAuthKind);

        let node: NodeRequest =
            serde_json::from_str(r#"{"ip":"h","ssh_username":"root","auth_type":"password"}"#)
                .unwrap();
        assert_eq!(Credential::try_from(node).unwrap_err(), CredentialError::MissingSecret);

        let node: NodeRequest = serde_json::from_str(
            r#"{"ip":"h","ssh_username":"root","password":""}"#,
        )
        .unwrap();
        assert_eq!(Credential::try_from(node).unwrap_err(), CredentialError::MissingSecret);
    }
}
