use crate::adapters::{DockerCli, MemoryStore, OpenAiClient, Sandbox};
use crate::app::gateway::Gateway;
use crate::app::services::{AuthService, CodeExecutionService, GraphExecutionService, GraphManager};
use crate::config::{AppConfig, StoreBackend, StoreConfig};
use crate::core::GraphRunner;
use crate::domain::{KeyValueStore, LlmClient};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use std::sync::Arc;

async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("🗄️ Using in-memory graph store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(crate::adapters::RedisStore::connect(&config.url).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(crate::utils::error::FlowError::ConfigError {
            message: "store.backend = \"redis\" needs a build with the `redis` feature".to_string(),
        }),
    }
}

/// Every service wired together from one configuration.
pub struct AppContext {
    pub graphs: GraphManager,
    pub auth: AuthService,
    pub code: Arc<CodeExecutionService<DockerCli>>,
    pub llm: Arc<dyn LlmClient>,
    pub runner: Arc<GraphRunner>,
    pub execution: GraphExecutionService,
}

impl AppContext {
    pub async fn from_config(config: &AppConfig, monitor: Option<Arc<SystemMonitor>>) -> Result<Self> {
        let store = connect_store(&config.store).await?;
        let graphs = GraphManager::new(store);
        let auth = AuthService::new(&config.auth, graphs.clone());

        let docker = DockerCli::new(config.sandbox.docker_binary.clone());
        let code = Arc::new(CodeExecutionService::new(Sandbox::new(docker, config.sandbox.clone())));
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm)?);

        let mut runner = GraphRunner::new(code.clone(), llm.clone());
        if let Some(monitor) = monitor {
            runner = runner.with_monitor(monitor);
        }
        let runner = Arc::new(runner);
        let execution = GraphExecutionService::new(graphs.clone(), runner.clone());

        Ok(Self {
            graphs,
            auth,
            code,
            llm,
            runner,
            execution,
        })
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::new(Gateway::new(
            self.auth.clone(),
            self.graphs.clone(),
            self.execution.clone(),
        ))
    }

    /// Removes the sandbox container if one was started.
    pub async fn shutdown(&self) -> Result<()> {
        self.code.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_wires_services() {
        let context = AppContext::from_config(&AppConfig::default(), None).await.unwrap();
        let id = context.graphs.create_graph("user1").await.unwrap();
        assert!(context.graphs.get_serialized_graph(id.as_str()).await.is_ok());
        // nothing ran, so there is no container to remove
        context.shutdown().await.unwrap();
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_requires_feature() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Redis;
        assert!(AppContext::from_config(&config, None).await.is_err());
    }
}
