mod cmd;
mod progress;

use std::net::SocketAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use imgscope::{Config, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imgscope")]
#[command(about = "Container image size and exposed-port lookup service")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Address the HTTP service listens on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8000", global = true)]
    bind: SocketAddr,

    /// Print JSON instead of a summary (inspect, check)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (the default)
    Serve,

    /// Resolve one image and print its size and exposed ports
    Inspect {
        /// Image reference, e.g. nginx:1.25
        image: String,
    },

    /// Check that the inspector binary is installed and runnable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let serving = matches!(cli.command, None | Some(Commands::Serve));
    init_logging(if serving { "info" } else { "warn" });

    let config = Config::from(cli.settings);

    match cli.command {
        None | Some(Commands::Serve) => cmd::serve::run(config, cli.bind).await,
        Some(Commands::Inspect { image }) => cmd::inspect::run(config, &image, cli.json).await,
        Some(Commands::Check) => cmd::check::run(&config, cli.json).await,
    }
}

/// `RUST_LOG` wins over the per-command default level.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
