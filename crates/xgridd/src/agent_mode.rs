//! Agent mode: runs on every proxy node.

use std::path::PathBuf;

use tokio::sync::watch;
use tracing::info;
use xgrid_agent::{Agent, AgentConfig};

pub async fn run_agent(config_path: PathBuf, config: AgentConfig) -> anyhow::Result<()> {
    let agent = Agent::with_systemd(config_path, config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    agent.run(shutdown_rx).await?;
    Ok(())
}
