#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

pub use toml_config::{
    AppConfig, AuthConfig, BootstrapConfig, DaemonConfig, LlmConfig, MonitoringConfig,
    SandboxConfig, ServerConfig, ServiceConfig, StoreBackend, StoreConfig, UserToken,
};
