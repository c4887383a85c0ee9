use crate::config::SandboxConfig;
use crate::domain::{CommandOutput, ContainerRuntime};
use crate::utils::error::{FlowError, Result};
use crate::utils::ids::random_identifier;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Drives the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        tracing::debug!("🐳 {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| FlowError::RuntimeError {
            message: format!("failed to launch '{}': {}", self.binary, e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

pub fn network_inspect_args(network: &str) -> Vec<String> {
    argv(&["network", "inspect", network])
}

pub fn network_create_args(network: &str) -> Vec<String> {
    argv(&["network", "create", "--internal", "--driver", "bridge", network])
}

pub fn run_detached_args(name: &str, config: &SandboxConfig) -> Vec<String> {
    argv(&[
        "run",
        "-d",
        "--name",
        name,
        "--network",
        &config.network,
        "--memory",
        &config.memory,
        "--cpus",
        &config.cpus,
        &config.image,
        "tail",
        "-f",
        "/dev/null",
    ])
}

pub fn exec_python_args(name: &str, python: &str) -> Vec<String> {
    argv(&["exec", "-i", name, python, "-"])
}

pub fn stop_args(name: &str) -> Vec<String> {
    argv(&["stop", "-t", "5", name])
}

pub fn kill_args(name: &str) -> Vec<String> {
    argv(&["kill", name])
}

pub fn rm_args(name: &str) -> Vec<String> {
    argv(&["rm", "-f", name])
}

pub fn build_args(image: &str, context: &str) -> Vec<String> {
    argv(&["build", "-t", image, context])
}

/// A long-running container on an internal network that executes Python
/// scripts piped over stdin.
pub struct Sandbox<R: ContainerRuntime> {
    runtime: R,
    config: SandboxConfig,
    container: Mutex<Option<String>>,
}

impl<R: ContainerRuntime> Sandbox<R> {
    pub fn new(runtime: R, config: SandboxConfig) -> Self {
        Self {
            runtime,
            config,
            container: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub async fn container_name(&self) -> Option<String> {
        self.container.lock().await.clone()
    }

    async fn checked(&self, args: Vec<String>) -> Result<CommandOutput> {
        let output = self.runtime.run(&args, None).await?;
        if !output.success() {
            return Err(FlowError::RuntimeError {
                message: format!(
                    "docker {} exited with {:?}: {}",
                    args.first().map(String::as_str).unwrap_or(""),
                    output.status,
                    output.stderr.trim()
                ),
            });
        }
        Ok(output)
    }

    pub async fn ensure_network(&self) -> Result<()> {
        let network = &self.config.network;
        let inspect = self.runtime.run(&network_inspect_args(network), None).await?;
        if inspect.success() {
            tracing::debug!(network = %network, "network already exists");
            return Ok(());
        }
        self.checked(network_create_args(network)).await?;
        tracing::info!(network = %network, "🔒 Created isolated network");
        Ok(())
    }

    /// Starts the container unless it is already running; returns its name.
    pub async fn start(&self) -> Result<String> {
        let mut container = self.container.lock().await;
        if let Some(name) = container.as_ref() {
            return Ok(name.clone());
        }

        self.ensure_network().await?;
        let name = format!("{}{}", self.config.container_prefix, random_identifier(8));
        self.checked(run_detached_args(&name, &self.config)).await?;
        tracing::info!(container = %name, image = %self.config.image, "🐳 Started sandbox container");
        *container = Some(name.clone());
        Ok(name)
    }

    /// Pipes `script` to the container's Python interpreter, starting the
    /// container first if needed.
    pub async fn exec_script(&self, script: &str) -> Result<CommandOutput> {
        let name = self.start().await?;
        self.runtime
            .run(&exec_python_args(&name, &self.config.python), Some(script.as_bytes()))
            .await
    }

    /// Stops and removes the container. Falls back to `kill` when a graceful
    /// stop fails. Without a running container this does nothing.
    pub async fn stop(&self) -> Result<()> {
        let Some(name) = self.container.lock().await.take() else {
            return Ok(());
        };

        let stopped = self.runtime.run(&stop_args(&name), None).await?;
        if !stopped.success() {
            tracing::warn!(container = %name, "graceful stop failed, killing: {}", stopped.stderr.trim());
            self.runtime.run(&kill_args(&name), None).await?;
        }
        self.checked(rm_args(&name)).await?;
        tracing::info!(container = %name, "🧹 Removed sandbox container");
        Ok(())
    }
}
