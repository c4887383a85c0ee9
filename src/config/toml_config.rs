use crate::utils::error::{FlowError, Result};
use crate::utils::validation::{
    validate_docker_name, validate_non_empty_string, validate_positive_number, validate_range,
    validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub bootstrap: BootstrapConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Docker sandbox used to run code blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub docker_binary: String,
    pub image: String,
    pub network: String,
    pub memory: String,
    pub cpus: String,
    pub container_prefix: String,
    pub exec_timeout_secs: u64,
    pub build_context: String,
    pub python: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            image: "python_runner".to_string(),
            network: "no-internet".to_string(),
            memory: "100m".to_string(),
            cpus: "0.5".to_string(),
            container_prefix: "long_running_python_runner".to_string(),
            exec_timeout_secs: 30,
            build_context: "docker".to_string(),
            python: "python".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo-instruct".to_string(),
            api_key: None,
            max_tokens: 256,
            temperature: 0.7,
            timeout_seconds: 60,
        }
    }
}

impl LlmConfig {
    /// 取得 API key，未設定時改讀 `OPENAI_KEY`
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            // an unresolved ${VAR} placeholder counts as unset
            .filter(|k| !k.trim().is_empty() && !k.starts_with("${"))
            .or_else(|| std::env::var("OPENAI_KEY").ok())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<UserToken>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let user = |token: &str, username: &str| UserToken {
            token: token.to_string(),
            username: username.to_string(),
        };
        Self {
            users: vec![user("user1_token", "user1"), user("user2_token", "user2")],
        }
    }
}

/// An external daemon the stack needs, such as the broker or the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub name: String,
    pub command: Vec<String>,
    /// `host:port` that accepts TCP connections once the daemon is ready.
    pub ready_addr: String,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

fn default_ready_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub daemons: Vec<DaemonConfig>,
    pub services: Vec<ServiceConfig>,
    pub build_image: bool,
    pub eager_sandbox: bool,
    pub stop_on_service_exit: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let args = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        Self {
            daemons: vec![
                DaemonConfig {
                    name: "broker".to_string(),
                    command: args(&["rabbitmq-server"]),
                    ready_addr: "127.0.0.1:5672".to_string(),
                    ready_timeout_secs: default_ready_timeout(),
                },
                DaemonConfig {
                    name: "cache".to_string(),
                    command: args(&["redis-server", "redis-server.conf"]),
                    ready_addr: "127.0.0.1:6379".to_string(),
                    ready_timeout_secs: default_ready_timeout(),
                },
            ],
            services: vec![ServiceConfig {
                name: "gateway".to_string(),
                command: args(&["blockflow", "serve", "--config", "config.toml"]),
            }],
            build_image: true,
            eager_sandbox: false,
            stop_on_service_exit: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| FlowError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed)?)
    }

    /// 替換環境變數 (例如 ${OPENAI_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| FlowError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("server.bind", &self.server.bind)?;
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|e| FlowError::InvalidConfigValueError {
                field: "server.bind".to_string(),
                value: self.server.bind.clone(),
                reason: e.to_string(),
            })?;

        validate_docker_name("sandbox.image", &self.sandbox.image)?;
        validate_docker_name("sandbox.network", &self.sandbox.network)?;
        validate_docker_name("sandbox.container_prefix", &self.sandbox.container_prefix)?;
        validate_non_empty_string("sandbox.memory", &self.sandbox.memory)?;
        validate_non_empty_string("sandbox.cpus", &self.sandbox.cpus)?;
        validate_positive_number("sandbox.exec_timeout_secs", self.sandbox.exec_timeout_secs, 1)?;

        validate_url("llm.base_url", &self.llm.base_url, &["http", "https"])?;
        validate_non_empty_string("llm.model", &self.llm.model)?;
        validate_positive_number("llm.max_tokens", u64::from(self.llm.max_tokens), 1)?;
        validate_range("llm.temperature", self.llm.temperature, 0.0, 2.0)?;
        validate_positive_number("llm.timeout_seconds", self.llm.timeout_seconds, 1)?;

        if self.store.backend == StoreBackend::Redis {
            validate_url("store.url", &self.store.url, &["redis", "rediss"])?;
        }

        for (i, user) in self.auth.users.iter().enumerate() {
            validate_non_empty_string(&format!("auth.users[{}].token", i), &user.token)?;
            validate_non_empty_string(&format!("auth.users[{}].username", i), &user.username)?;
        }

        for daemon in &self.bootstrap.daemons {
            if daemon.command.is_empty() {
                return Err(FlowError::MissingConfigError {
                    field: format!("bootstrap.daemons.{}.command", daemon.name),
                });
            }
            validate_non_empty_string(&format!("bootstrap.daemons.{}.ready_addr", daemon.name), &daemon.ready_addr)?;
        }
        for service in &self.bootstrap.services {
            if service.command.is_empty() {
                return Err(FlowError::MissingConfigError {
                    field: format!("bootstrap.services.{}.command", service.name),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.sandbox.network, "no-internet");
        assert_eq!(config.sandbox.memory, "100m");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.auth.users.len(), 2);
        assert_eq!(config.bootstrap.daemons[1].command, vec!["redis-server", "redis-server.conf"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let toml_content = r#"
[server]
bind = "127.0.0.1:9000"

[sandbox]
image = "runner"
exec_timeout_secs = 5

[llm]
base_url = "http://localhost:1234/v1"
temperature = 0.2

[store]
backend = "redis"
url = "redis://cache:6379"

[[auth.users]]
token = "abc"
username = "alice"

[bootstrap]
eager_sandbox = true
services = []

[monitoring]
enabled = true
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.sandbox.image, "runner");
        assert_eq!(config.sandbox.network, "no-internet");
        assert_eq!(config.sandbox.exec_timeout_secs, 5);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.auth.users, vec![UserToken { token: "abc".into(), username: "alice".into() }]);
        assert!(config.bootstrap.eager_sandbox);
        assert!(config.bootstrap.services.is_empty());
        assert!(config.monitoring_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BLOCKFLOW_TEST_LLM_KEY", "sk-test");

        let toml_content = r#"
[llm]
api_key = "${BLOCKFLOW_TEST_LLM_KEY}"
model = "${BLOCKFLOW_TEST_UNSET_VAR}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "${BLOCKFLOW_TEST_UNSET_VAR}");

        std::env::remove_var("BLOCKFLOW_TEST_LLM_KEY");
    }

    #[test]
    fn test_config_validation() {
        let bad_url = AppConfig::from_toml_str("[llm]\nbase_url = \"invalid-url\"").unwrap();
        assert!(bad_url.validate().is_err());

        let bad_temp = AppConfig::from_toml_str("[llm]\ntemperature = 3.5").unwrap();
        assert!(bad_temp.validate().is_err());

        let bad_bind = AppConfig::from_toml_str("[server]\nbind = \"nowhere\"").unwrap();
        assert!(bad_bind.validate().is_err());

        let bad_store = AppConfig::from_toml_str("[store]\nbackend = \"redis\"\nurl = \"http://x\"").unwrap();
        assert!(bad_store.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        assert!(matches!(
            AppConfig::from_toml_str("[store]\nbackend = \"etcd\""),
            Err(FlowError::TomlError(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[sandbox]\nimage = \"file_runner\"\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.sandbox.image, "file_runner");
        assert!(AppConfig::from_file("/definitely/not/here.toml").is_err());
    }
}
