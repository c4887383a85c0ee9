use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "blockflow")]
#[command(about = "Dataflow graphs of code and LLM blocks, with a sandboxed runner and an HTTP gateway")]
#[command(version)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Overrides `server.bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a graph file and print the run report
    Run {
        graph: PathBuf,

        /// Only run this block and the blocks downstream of it
        #[arg(long)]
        from: Option<String>,

        /// Write the updated graph here
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, help = "Log CPU and memory after each level")]
        monitor: bool,
    },

    /// Print the evaluation order of a graph file
    Order {
        graph: PathBuf,

        #[arg(long)]
        from: Option<String>,
    },

    /// Print the block diagram of a graph file
    Diagram { graph: PathBuf },

    /// Start daemons, prepare the sandbox and launch the services
    Bootstrap {
        #[arg(long, help = "Print the planned commands without running them")]
        dry_run: bool,
    },
}
