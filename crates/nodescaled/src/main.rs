//! nodescaled: the nodescale daemon.
//!
//! Assembles the control loop for one fleet:
//! - DigitalOcean cloud client
//! - Signed HTTP health prober
//! - Lifecycle controller + deployment orchestrator
//! - Fleet monitor (periodic tick)
//! - Deploy trigger / status / metrics API
//!
//! # Usage
//!
//! ```text
//! nodescaled run --config /etc/nodescale/nodescale.toml
//! nodescaled check-config --config nodescale.toml
//! nodescaled deploy --url http://scaler.internal:2345
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,nodescaled=debug,nodescale_monitor=debug,nodescale_lifecycle=debug,nodescale_rollout=debug";

#[derive(Parser)]
#[command(name = "nodescaled", version, about = "nodescale daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler and the deploy trigger API.
    Run {
        /// Path to the TOML configuration.
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Validate a configuration file and print it with defaults filled in.
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Ask a running daemon to redeploy the whole fleet.
    Deploy {
        /// Base URL of the daemon's API.
        #[arg(long, default_value = "http://127.0.0.1:2345")]
        url: String,

        /// Environment variable holding the service key.
        #[arg(long, default_value = "NODESCALE_SERVICE_KEY")]
        key_env: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config } => daemon::run(&config).await,
        Command::CheckConfig { config } => daemon::check_config(&config),
        Command::Deploy { url, key_env } => daemon::request_deploy(&url, &key_env).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
