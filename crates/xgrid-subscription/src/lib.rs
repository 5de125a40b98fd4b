//! xgrid-subscription: per-client subscription bundles.
//!
//! A bundle is built from one ordered endpoint list: one endpoint per
//! (node, inbound) pair across every group the client holds a usable
//! subscription to, sorted by weight descending then name ascending. Client
//! apps display endpoints in the order returned, so that ordering is part of
//! the output contract.
//!
//! # Formats
//!
//! | Format | Aliases | Content type |
//! |---|---|---|
//! | `json` (default) | | `application/json` |
//! | `clash` | | `application/yaml` |
//! | `v2ray` | `v2` | `text/plain` |
//! | `shadowrocket` | `sr` | `text/plain` |

pub mod endpoint;
pub mod error;
pub mod format;
pub mod render;
pub mod service;

pub use endpoint::{Endpoint, sort_endpoints};
pub use error::{SubscriptionError, SubscriptionResult};
pub use format::Format;
pub use service::{Bundle, SubscriptionService};
