//! Error types for the node agent.

use thiserror::Error;
use xgrid_cluster::ClientError;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration not applied yet")]
    NotConfigured,

    #[error("registration failed: {0}")]
    Registration(#[from] ClientError),

    #[error("{command} failed: {detail}")]
    Command { command: String, detail: String },

    #[error("unsupported platform for automatic proxy installation")]
    UnsupportedPlatform,

    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
