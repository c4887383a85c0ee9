use crate::domain::{ManagedProcess, ProcessLauncher};
use crate::utils::error::{FlowError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Spawns processes with `tokio::process`, sharing the parent's stdout/stderr.
#[derive(Debug, Clone, Default)]
pub struct TokioLauncher;

impl TokioLauncher {
    pub fn new() -> Self {
        Self
    }
}

pub struct TokioProcess {
    name: String,
    child: Child,
}

impl TokioProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl ManagedProcess for TokioProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<()> {
        // already exited
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn spawn(&self, name: &str, command: &[String]) -> Result<Box<dyn ManagedProcess>> {
        let (program, args) = command.split_first().ok_or_else(|| FlowError::BootstrapError {
            step: name.to_string(),
            reason: "empty command".to_string(),
        })?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FlowError::BootstrapError {
                step: name.to_string(),
                reason: format!("failed to launch '{}': {}", program, e),
            })?;

        tracing::info!(process = name, pid = ?child.id(), "🚀 Launched {}", command.join(" "));
        Ok(Box::new(TokioProcess {
            name: name.to_string(),
            child,
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let launcher = TokioLauncher::new();
        let mut process = launcher.spawn("exit3", &argv(&["sh", "-c", "exit 3"])).await.unwrap();
        assert_eq!(process.name(), "exit3");
        assert_eq!(process.wait().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_kill_terminates_long_running_process() {
        let launcher = TokioLauncher::new();
        let mut process = launcher.spawn("sleeper", &argv(&["sleep", "30"])).await.unwrap();
        process.kill().await.unwrap();
        // killed by a signal, so no exit code
        assert_eq!(process.wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_program_is_bootstrap_error() {
        let launcher = TokioLauncher::new();
        let result = launcher.spawn("ghost", &argv(&["definitely-not-a-real-binary-xyz"])).await;
        assert!(matches!(result, Err(FlowError::BootstrapError { .. })));
        assert!(matches!(
            launcher.spawn("empty", &[]).await,
            Err(FlowError::BootstrapError { .. })
        ));
    }
}
