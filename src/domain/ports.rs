use crate::domain::model::Value;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runs a code snippet with the given input variables and returns the
/// requested output variables.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        inputs: &BTreeMap<String, Value>,
        outputs: &[String],
    ) -> Result<BTreeMap<String, Value>>;
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// The subset of Redis commands the graph store relies on.
///
/// A key exists while it holds a non-empty hash or set.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;
    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// A container engine driven through its command line (`docker ...`).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput>;
}

#[async_trait]
impl<T: ContainerRuntime + ?Sized> ContainerRuntime for Arc<T> {
    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        (**self).run(args, stdin).await
    }
}

/// A background process started by [`ProcessLauncher`].
#[async_trait]
pub trait ManagedProcess: Send {
    fn name(&self) -> &str;

    /// Waits for the process to exit and returns its exit code.
    async fn wait(&mut self) -> Result<Option<i32>>;

    async fn kill(&mut self) -> Result<()>;
}

/// Starts long-running daemons and service processes for the bootstrap sequence.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, name: &str, command: &[String]) -> Result<Box<dyn ManagedProcess>>;
}
