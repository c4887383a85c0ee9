use blockflow::adapters::{DockerCli, TokioLauncher};
use blockflow::app::{gateway, Bootstrap};
use blockflow::config::cli::{Cli, Command};
use blockflow::utils::error::ErrorSeverity;
use blockflow::utils::monitor::SystemMonitor;
use blockflow::utils::{logger, validation::Validate};
use blockflow::{AppConfig, AppContext, FlowError, Graph};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

fn load_config(path: Option<&Path>) -> blockflow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn read_graph(path: &Path) -> blockflow::Result<Graph> {
    let content = tokio::fs::read_to_string(path).await?;
    Graph::from_json(&content)
}

async fn serve(config: &AppConfig, bind: Option<String>) -> blockflow::Result<()> {
    let monitor = config.monitoring_enabled().then(|| Arc::new(SystemMonitor::new()));
    let context = AppContext::from_config(config, monitor).await?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    let served = gateway::serve(&bind, context.gateway()).await;
    context.shutdown().await?;
    served
}

async fn run_graph(
    config: &AppConfig,
    path: &Path,
    from: Option<&str>,
    output: Option<&Path>,
    monitor: bool,
) -> blockflow::Result<()> {
    let mut graph = read_graph(path).await?;

    let monitor = (monitor || config.monitoring_enabled()).then(|| {
        tracing::info!("🔍 System monitoring enabled");
        Arc::new(SystemMonitor::new())
    });
    let context = AppContext::from_config(config, monitor.clone()).await?;

    let result = match from {
        Some(start) => context.runner.run_after(&mut graph, start).await,
        None => context.runner.run_all(&mut graph).await,
    };
    context.shutdown().await?;
    let report = result?;

    if let Some(monitor) = monitor {
        monitor.log_final_stats();
    }
    if let Some(output) = output {
        tokio::fs::write(output, graph.to_json_pretty()?).await?;
        tracing::info!("📁 Updated graph saved to: {}", output.display());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn bootstrap(config: AppConfig, dry_run: bool) -> blockflow::Result<()> {
    if dry_run {
        for step in blockflow::app::plan(&config) {
            println!("{}", step.describe(&config.sandbox.docker_binary));
        }
        return Ok(());
    }

    let runtime = Arc::new(DockerCli::new(config.sandbox.docker_binary.clone()));
    let bootstrap = Bootstrap::new(config, runtime, Arc::new(TokioLauncher::new()));
    let supervisor = bootstrap.start().await?;
    supervisor
        .supervise(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
}

async fn execute(cli: Cli) -> blockflow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    if cli.verbose {
        tracing::debug!("Configuration: {:?}", config);
    }

    match cli.command {
        Command::Serve { bind } => serve(&config, bind).await,
        Command::Run {
            graph,
            from,
            output,
            monitor,
        } => run_graph(&config, &graph, from.as_deref(), output.as_deref(), monitor).await,
        Command::Order { graph, from } => {
            let graph = read_graph(&graph).await?;
            for (level, names) in graph.evaluation_levels(from.as_deref())?.iter().enumerate() {
                println!("{}\t{}", level, names.join(", "));
            }
            Ok(())
        }
        Command::Diagram { graph } => {
            println!("{}", read_graph(&graph).await?.diagram());
            Ok(())
        }
        Command::Bootstrap { dry_run } => bootstrap(config, dry_run).await,
    }
}

fn exit_code(e: &FlowError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::info!("Starting blockflow {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = execute(cli).await {
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // Low severity is a warning, the command still counts as done
        let code = exit_code(&e);
        if code > 0 {
            std::process::exit(code);
        }
    }
    Ok(())
}
