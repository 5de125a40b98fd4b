//! Error types for the control plane.

use thiserror::Error;
use xgrid_distribution::DistributionError;
use xgrid_state::StateError;

pub type RegistryResult<T> = Result<T, RegistryError>;
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid signature, unknown node.
    Unauthorized,
    /// Malformed payload or missing field.
    BadRequest,
    NotFound,
    /// Storage or downstream failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error(transparent)]
    Storage(#[from] StateError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidPayload(_) => ErrorKind::BadRequest,
            Self::NodeNotFound(_) => ErrorKind::NotFound,
            Self::Distribution(DistributionError::MissingNodeId) => ErrorKind::BadRequest,
            Self::Distribution(DistributionError::NodeNotFound(_)) => ErrorKind::NotFound,
            Self::Storage(_) | Self::Distribution(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from the HTTP clients on either side of the control plane.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("peer rejected request: {0}")]
    Rejected(String),

    #[error("encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("node {0} has no reachable address")]
    NoAddress(String),

    #[error(transparent)]
    Config(#[from] DistributionError),
}
