use thiserror::Error;
use xgrid_distribution::DistributionError;
use xgrid_state::StateError;

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("client {0} not found")]
    ClientNotFound(String),

    #[error("client {0} is inactive")]
    ClientInactive(String),

    #[error("client {0} subscription expired")]
    ClientExpired(String),

    #[error("no active subscriptions for client {0}")]
    NoActiveSubscriptions(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("render {format}: {message}")]
    Render { format: &'static str, message: String },

    #[error(transparent)]
    Storage(#[from] StateError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

impl SubscriptionError {
    /// True when the request itself is at fault rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Render { .. } | Self::Storage(_) | Self::Distribution(_)
        )
    }
}
