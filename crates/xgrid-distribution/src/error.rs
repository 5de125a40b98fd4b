use thiserror::Error;
use xgrid_state::StateError;

pub type DistributionResult<T> = Result<T, DistributionError>;

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("node id is required")]
    MissingNodeId,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("inbound {name} {section}: {source}")]
    InvalidInbound {
        name: String,
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StateError),
}
