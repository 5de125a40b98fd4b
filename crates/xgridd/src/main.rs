//! xgridd: the xgrid daemon.
//!
//! One binary, two roles:
//! - `master`: state store, registry, subscription endpoint, admin surface
//!   and the health monitor behind one HTTP listener
//! - `agent`: registers with the master, serves the signed node RPC surface
//!   and supervises the local proxy engine
//!
//! # Usage
//!
//! ```text
//! xgridd master --config /etc/xgrid/master.toml
//! xgridd agent --config /etc/xgrid/agent.json
//! ```

mod agent_mode;
mod config;
mod master_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const MASTER_LOG_FILTER: &str = "info,xgridd=debug,xgrid=debug";

#[derive(Parser)]
#[command(name = "xgridd", about = "xgrid proxy fleet daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
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
    /// Run the controller.
    Master {
        /// TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Override `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the node agent.
    Agent {
        /// JSON configuration file. Rewritten once registration issues a secret.
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Master { config, port } => {
            let mut config = config::MasterConfig::load(&config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(cli.log_format, MASTER_LOG_FILTER);
            master_mode::run_master(config).await
        }
        Command::Agent { config } => {
            let agent_config = xgrid_agent::AgentConfig::load(&config)?;
            init_tracing(cli.log_format, &agent_config.log_level);
            agent_mode::run_agent(config, agent_config).await
        }
    }
}

/// `RUST_LOG` wins over `default_filter`.
fn init_tracing(format: LogFormat, default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
