//! xgrid-distribution: builds the proxy configuration pushed to each node.
//!
//! A node's configuration is the full set of active central inbounds, a fixed
//! pair of default outbounds, and the clients entitled to the node through
//! its group memberships. The computation is read-only and safe to run
//! concurrently; every call stamps a fresh `last_updated_at`.

pub mod error;
pub mod inbound;
pub mod service;

pub use error::{DistributionError, DistributionResult};
pub use inbound::ResolvedInbound;
pub use service::ConfigService;
