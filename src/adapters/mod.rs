// Adapters layer: concrete implementations of the domain ports (docker, http, stores, processes).

pub mod docker;
pub mod memory_store;
pub mod openai;
pub mod process;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use docker::{DockerCli, Sandbox};
pub use memory_store::MemoryStore;
pub use openai::OpenAiClient;
pub use process::TokioLauncher;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
