use crate::adapters::docker::{build_args, network_create_args, network_inspect_args, run_detached_args};
use crate::adapters::Sandbox;
use crate::config::{AppConfig, DaemonConfig};
use crate::domain::{ContainerRuntime, ManagedProcess, ProcessLauncher};
use crate::utils::error::{FlowError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};

const PROBE_INTERVAL: Duration = Duration::from_millis(200);
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// 啟動流程中的單一步驟
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    EnsureDaemon {
        name: String,
        command: Vec<String>,
        ready_addr: String,
        timeout_secs: u64,
    },
    BuildImage {
        args: Vec<String>,
    },
    EnsureNetwork {
        inspect: Vec<String>,
        create: Vec<String>,
    },
    /// The container name gets a random suffix when the step runs.
    StartSandbox {
        args: Vec<String>,
    },
    LaunchService {
        name: String,
        command: Vec<String>,
    },
}

impl PlannedStep {
    pub fn name(&self) -> String {
        match self {
            PlannedStep::EnsureDaemon { name, .. } => format!("daemon:{}", name),
            PlannedStep::BuildImage { .. } => "build-image".to_string(),
            PlannedStep::EnsureNetwork { .. } => "network".to_string(),
            PlannedStep::StartSandbox { .. } => "sandbox".to_string(),
            PlannedStep::LaunchService { name, .. } => format!("service:{}", name),
        }
    }

    /// Shell-like rendering used by `bootstrap --dry-run`.
    pub fn describe(&self, docker: &str) -> String {
        let docker_cmd = |args: &[String]| format!("{} {}", docker, args.join(" "));
        match self {
            PlannedStep::EnsureDaemon {
                command,
                ready_addr,
                timeout_secs,
                ..
            } => format!(
                "{} &  # unless {} accepts connections; wait up to {}s",
                command.join(" "),
                ready_addr,
                timeout_secs
            ),
            PlannedStep::BuildImage { args } => docker_cmd(args),
            PlannedStep::EnsureNetwork { inspect, create } => {
                format!("{} || {}", docker_cmd(inspect), docker_cmd(create))
            }
            PlannedStep::StartSandbox { args } => docker_cmd(args),
            PlannedStep::LaunchService { command, .. } => format!("{} &", command.join(" ")),
        }
    }
}

/// The launch sequence for `config`, in execution order. Does not touch the system.
pub fn plan(config: &AppConfig) -> Vec<PlannedStep> {
    let boot = &config.bootstrap;
    let sandbox = &config.sandbox;
    let mut steps: Vec<PlannedStep> = boot
        .daemons
        .iter()
        .map(|d| PlannedStep::EnsureDaemon {
            name: d.name.clone(),
            command: d.command.clone(),
            ready_addr: d.ready_addr.clone(),
            timeout_secs: d.ready_timeout_secs,
        })
        .collect();

    if boot.build_image {
        steps.push(PlannedStep::BuildImage {
            args: build_args(&sandbox.image, &sandbox.build_context),
        });
    }
    steps.push(PlannedStep::EnsureNetwork {
        inspect: network_inspect_args(&sandbox.network),
        create: network_create_args(&sandbox.network),
    });
    if boot.eager_sandbox {
        let name = format!("{}<id>", sandbox.container_prefix);
        steps.push(PlannedStep::StartSandbox {
            args: run_detached_args(&name, sandbox),
        });
    }
    steps.extend(boot.services.iter().map(|s| PlannedStep::LaunchService {
        name: s.name.clone(),
        command: s.command.clone(),
    }));
    steps
}

fn step_failed(step: impl Into<String>, reason: impl Into<String>) -> FlowError {
    FlowError::BootstrapError {
        step: step.into(),
        reason: reason.into(),
    }
}

async fn accepts_connections(addr: &str) -> bool {
    matches!(timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Polls `addr` until a TCP connection succeeds or `limit` elapses.
pub async fn wait_for_tcp(addr: &str, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        if accepts_connections(addr).await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FlowError::Timeout {
                operation: format!("waiting for {} to accept connections", addr),
                seconds: limit.as_secs(),
            });
        }
        sleep(PROBE_INTERVAL).await;
    }
}

enum Readiness {
    Ready(Result<()>),
    Exited(Result<Option<i32>>),
}

/// Runs the launch sequence and keeps track of everything it started.
pub struct Bootstrap {
    config: AppConfig,
    runtime: Arc<dyn ContainerRuntime>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl Bootstrap {
    pub fn new(config: AppConfig, runtime: Arc<dyn ContainerRuntime>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            config,
            runtime,
            launcher,
        }
    }

    pub fn plan(&self) -> Vec<PlannedStep> {
        plan(&self.config)
    }

    async fn ensure_daemon(&self, daemon: &DaemonConfig) -> Result<Option<Box<dyn ManagedProcess>>> {
        let step = format!("daemon:{}", daemon.name);
        if accepts_connections(&daemon.ready_addr).await {
            tracing::info!(daemon = %daemon.name, addr = %daemon.ready_addr, "✅ Already running");
            return Ok(None);
        }

        let mut process = self.launcher.spawn(&daemon.name, &daemon.command).await?;
        let limit = Duration::from_secs(daemon.ready_timeout_secs);
        let readiness = tokio::select! {
            ready = wait_for_tcp(&daemon.ready_addr, limit) => Readiness::Ready(ready),
            status = process.wait() => Readiness::Exited(status),
        };

        match readiness {
            Readiness::Ready(ready) => {
                ready.map_err(|e| step_failed(&step, e.to_string()))?;
                tracing::info!(daemon = %daemon.name, addr = %daemon.ready_addr, "✅ Daemon ready");
                Ok(Some(process))
            }
            // daemonized: the launcher returned and the server lives on
            Readiness::Exited(Ok(Some(0))) => {
                wait_for_tcp(&daemon.ready_addr, limit)
                    .await
                    .map_err(|e| step_failed(&step, e.to_string()))?;
                tracing::info!(daemon = %daemon.name, addr = %daemon.ready_addr, "✅ Daemon ready");
                Ok(None)
            }
            Readiness::Exited(status) => Err(step_failed(
                step,
                format!(
                    "exited with {:?} before accepting connections on {}",
                    status?, daemon.ready_addr
                ),
            )),
        }
    }

    async fn build_image(&self, args: &[String]) -> Result<()> {
        tracing::info!("🔨 Building sandbox image '{}'", self.config.sandbox.image);
        let output = self.runtime.run(args, None).await?;
        if !output.success() {
            return Err(step_failed(
                "build-image",
                format!("docker build exited with {:?}: {}", output.status, output.stderr.trim()),
            ));
        }
        Ok(())
    }

    /// Runs every planned step, stopping at the first failure.
    pub async fn start(&self) -> Result<Supervisor> {
        let boot = &self.config.bootstrap;
        let mut supervisor = Supervisor {
            daemons: Vec::new(),
            services: Vec::new(),
            sandbox: None,
            stop_on_service_exit: boot.stop_on_service_exit,
        };
        let sandbox = Arc::new(Sandbox::new(Arc::clone(&self.runtime), self.config.sandbox.clone()));

        for step in self.plan() {
            tracing::info!(step = %step.name(), "▶️ {}", step.describe(&self.config.sandbox.docker_binary));
            let result = match &step {
                PlannedStep::EnsureDaemon { name, .. } => {
                    match boot.daemons.iter().find(|d| &d.name == name) {
                        Some(daemon) => self
                            .ensure_daemon(daemon)
                            .await
                            .map(|process| supervisor.daemons.extend(process)),
                        None => Err(step_failed(step.name(), "no such daemon in config")),
                    }
                }
                PlannedStep::BuildImage { args } => self.build_image(args).await,
                PlannedStep::EnsureNetwork { .. } => sandbox.ensure_network().await,
                PlannedStep::StartSandbox { .. } => sandbox
                    .start()
                    .await
                    .map(|_| supervisor.sandbox = Some(Arc::clone(&sandbox))),
                PlannedStep::LaunchService { name, command } => self
                    .launcher
                    .spawn(name, command)
                    .await
                    .map(|process| supervisor.services.push(process)),
            };

            if let Err(e) = result {
                tracing::error!(step = %step.name(), "❌ Bootstrap step failed: {}", e);
                supervisor.shutdown().await;
                return Err(match e {
                    FlowError::BootstrapError { .. } => e,
                    other => step_failed(step.name(), other.to_string()),
                });
            }
        }

        tracing::info!(services = supervisor.services.len(), "🚀 Bootstrap complete");
        Ok(supervisor)
    }
}

/// Owns the processes and container started by [`Bootstrap::start`].
pub struct Supervisor {
    daemons: Vec<Box<dyn ManagedProcess>>,
    services: Vec<Box<dyn ManagedProcess>>,
    sandbox: Option<Arc<Sandbox<Arc<dyn ContainerRuntime>>>>,
    stop_on_service_exit: bool,
}

enum Watch {
    Exited(Result<Option<i32>>),
    Stop,
}

impl Supervisor {
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Logs service exits until `shutdown` resolves (or, with
    /// `stop_on_service_exit`, until the first service exits), then stops
    /// everything that is still running.
    pub async fn supervise<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<(String, Result<Option<i32>>)>();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let mut running = self.services.len();
        for mut process in self.services.drain(..) {
            let exit_tx = exit_tx.clone();
            let mut stop_rx = stop_rx.clone();
            tasks.spawn(async move {
                let name = process.name().to_string();
                let watched = tokio::select! {
                    status = process.wait() => Watch::Exited(status),
                    _ = stop_rx.changed() => Watch::Stop,
                };
                match watched {
                    Watch::Exited(status) => {
                        let _ = exit_tx.send((name, status));
                    }
                    Watch::Stop => match process.kill().await {
                        Ok(()) => tracing::info!(service = %name, "🛑 Stopped"),
                        Err(e) => tracing::warn!(service = %name, "failed to stop: {}", e),
                    },
                }
            });
        }
        drop(exit_tx);

        tokio::pin!(shutdown);
        loop {
            if running == 0 {
                tracing::info!("No services left running");
                break;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping services");
                    break;
                }
                exited = exit_rx.recv() => {
                    let Some((name, status)) = exited else { break };
                    running -= 1;
                    match status {
                        Ok(Some(0)) => tracing::info!(service = %name, "Service exited"),
                        Ok(code) => tracing::warn!(service = %name, ?code, "⚠️ Service exited abnormally"),
                        Err(e) => tracing::error!(service = %name, "❌ Lost track of service: {}", e),
                    }
                    if self.stop_on_service_exit {
                        tracing::warn!("Stopping the remaining services after '{}' exited", name);
                        break;
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        while tasks.join_next().await.is_some() {}
        self.shutdown().await;
        Ok(())
    }

    /// Stops the eager sandbox and any daemon this bootstrap started.
    async fn shutdown(&mut self) {
        for mut process in self.services.drain(..) {
            if let Err(e) = process.kill().await {
                tracing::warn!(service = %process.name(), "failed to stop: {}", e);
            }
        }
        if let Some(sandbox) = self.sandbox.take() {
            if let Err(e) = sandbox.stop().await {
                tracing::warn!("failed to stop sandbox: {}", e);
            }
        }
        for mut daemon in self.daemons.drain(..).rev() {
            match daemon.kill().await {
                Ok(()) => tracing::info!(daemon = %daemon.name(), "🛑 Stopped"),
                Err(e) => tracing::warn!(daemon = %daemon.name(), "failed to stop: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::domain::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_default_plan_order_and_arguments() {
        let steps = plan(&AppConfig::default());
        let names: Vec<String> = steps.iter().map(PlannedStep::name).collect();
        assert_eq!(
            names,
            vec![
                "daemon:broker",
                "daemon:cache",
                "build-image",
                "network",
                "service:gateway",
            ]
        );
        assert_eq!(
            steps[2],
            PlannedStep::BuildImage {
                args: argv(&["build", "-t", "python_runner", "docker"])
            }
        );
        assert_eq!(
            steps[4],
            PlannedStep::LaunchService {
                name: "gateway".to_string(),
                command: argv(&["blockflow", "serve", "--config", "config.toml"]),
            }
        );
        assert_eq!(steps[1].describe("docker").split("  #").next(), Some("redis-server redis-server.conf &"));
    }

    #[test]
    fn test_eager_sandbox_step_has_limits() {
        let mut config = AppConfig::default();
        config.bootstrap.eager_sandbox = true;
        config.bootstrap.build_image = false;
        let steps = plan(&config);
        let sandbox = steps
            .iter()
            .find_map(|s| match s {
                PlannedStep::StartSandbox { args } => Some(args.join(" ")),
                _ => None,
            })
            .unwrap();
        assert!(sandbox.contains("--network no-internet"));
        assert!(sandbox.contains("--memory 100m"));
        assert!(sandbox.contains("--cpus 0.5"));
        assert!(!steps.iter().any(|s| matches!(s, PlannedStep::BuildImage { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        wait_for_tcp(&addr, Duration::from_secs(1)).await.unwrap();
        drop(listener);
        assert!(matches!(
            wait_for_tcp(&addr, Duration::from_millis(300)).await,
            Err(FlowError::Timeout { .. })
        ));
    }

    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
        fail_build: bool,
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn run(&self, args: &[String], _stdin: Option<&[u8]>) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.join(" "));
            let failed = (self.fail_build && args[0] == "build") || args[..2] == ["network", "inspect"];
            Ok(CommandOutput {
                status: Some(if failed { 1 } else { 0 }),
                stdout: String::new(),
                stderr: if failed { "boom".to_string() } else { String::new() },
            })
        }
    }

    struct FakeProcess {
        name: String,
        exit_after: Option<Duration>,
        killed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ManagedProcess for FakeProcess {
        fn name(&self) -> &str {
            &self.name
        }

        async fn wait(&mut self) -> Result<Option<i32>> {
            match self.exit_after {
                Some(after) => {
                    sleep(after).await;
                    Ok(Some(1))
                }
                None => std::future::pending().await,
            }
        }

        async fn kill(&mut self) -> Result<()> {
            self.killed.lock().unwrap().push(self.name.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        spawned: Mutex<Vec<String>>,
        killed: Arc<Mutex<Vec<String>>>,
        fail_spawn: bool,
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn spawn(&self, name: &str, _command: &[String]) -> Result<Box<dyn ManagedProcess>> {
            if self.fail_spawn {
                return Err(step_failed(format!("service:{}", name), "binary not found"));
            }
            self.spawned.lock().unwrap().push(name.to_string());
            Ok(Box::new(FakeProcess {
                name: name.to_string(),
                exit_after: (name == "short").then(|| Duration::from_millis(50)),
                killed: Arc::clone(&self.killed),
            }))
        }
    }

    async fn config_with_ready_daemon(listener: &TcpListener) -> AppConfig {
        let mut config = AppConfig::default();
        for daemon in &mut config.bootstrap.daemons {
            daemon.ready_addr = listener.local_addr().unwrap().to_string();
        }
        config.bootstrap.services = vec![
            ServiceConfig {
                name: "short".to_string(),
                command: argv(&["short"]),
            },
            ServiceConfig {
                name: "long".to_string(),
                command: argv(&["long"]),
            },
        ];
        config
    }

    #[tokio::test]
    async fn test_start_runs_steps_and_supervisor_stops_on_exit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_with_ready_daemon(&listener).await;
        config.bootstrap.stop_on_service_exit = true;

        let runtime = Arc::new(RecordingRuntime::default());
        let launcher = Arc::new(FakeLauncher::default());
        let bootstrap = Bootstrap::new(config, runtime.clone(), launcher.clone());

        let supervisor = bootstrap.start().await.unwrap();
        assert_eq!(supervisor.service_count(), 2);
        // daemons already accept connections, so only the services were spawned
        assert_eq!(*launcher.spawned.lock().unwrap(), vec!["short", "long"]);
        assert_eq!(
            *runtime.calls.lock().unwrap(),
            vec![
                "build -t python_runner docker",
                "network inspect no-internet",
                "network create --internal --driver bridge no-internet",
            ]
        );

        timeout(Duration::from_secs(5), supervisor.supervise(std::future::pending()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*launcher.killed.lock().unwrap(), vec!["long"]);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_all_services() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_with_ready_daemon(&listener).await;
        config.bootstrap.services.retain(|s| s.name == "long");

        let launcher = Arc::new(FakeLauncher::default());
        let bootstrap = Bootstrap::new(config, Arc::new(RecordingRuntime::default()), launcher.clone());
        let supervisor = bootstrap.start().await.unwrap();

        supervisor.supervise(sleep(Duration::from_millis(50))).await.unwrap();
        assert_eq!(*launcher.killed.lock().unwrap(), vec!["long"]);
    }

    #[tokio::test]
    async fn test_failed_build_aborts_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_with_ready_daemon(&listener).await;
        let runtime = Arc::new(RecordingRuntime {
            fail_build: true,
            ..RecordingRuntime::default()
        });
        let launcher = Arc::new(FakeLauncher::default());
        let bootstrap = Bootstrap::new(config, runtime.clone(), launcher.clone());

        let err = bootstrap.start().await.err().unwrap();
        assert!(matches!(err, FlowError::BootstrapError { ref step, .. } if step == "build-image"));
        assert_eq!(runtime.calls.lock().unwrap().len(), 1);
        assert!(launcher.spawned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_service_removes_eager_sandbox() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_with_ready_daemon(&listener).await;
        config.bootstrap.build_image = false;
        config.bootstrap.eager_sandbox = true;
        let runtime = Arc::new(RecordingRuntime::default());
        let launcher = Arc::new(FakeLauncher {
            fail_spawn: true,
            ..FakeLauncher::default()
        });
        let bootstrap = Bootstrap::new(config, runtime.clone(), launcher);

        let err = bootstrap.start().await.err().unwrap();
        assert!(matches!(err, FlowError::BootstrapError { ref step, .. } if step == "service:short"));

        let calls = runtime.calls.lock().unwrap().clone();
        let subcommands: Vec<&str> = calls.iter().filter_map(|c| c.split(' ').next()).collect();
        let run = subcommands.iter().position(|c| *c == "run").unwrap();
        assert!(calls[run].starts_with("run -d --name long_running_python_runner"));
        assert_eq!(subcommands[run..], ["run", "stop", "rm"]);
    }
}
