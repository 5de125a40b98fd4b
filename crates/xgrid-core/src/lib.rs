//! xgrid-core: primitives shared by the controller and the node agent.
//!
//! - [`security`]: HMAC-SHA256 request signing and secret generation
//! - [`document`]: ordered JSON documents for opaque proxy settings
//! - [`protocol`]: request/response bodies exchanged over HTTP

pub mod document;
pub mod protocol;
pub mod security;

pub use document::{Document, StreamSettingsExt};
pub use protocol::*;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
