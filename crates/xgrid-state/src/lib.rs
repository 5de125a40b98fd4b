//! xgrid-state: embedded state store for the xgrid controller.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for nodes, groups, memberships, central inbounds, clients,
//! subscriptions and per-node client counters.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Every mutation is a single write transaction; redb serializes writers, so
//! read-modify-write operations such as [`StateStore::register_node`] are
//! atomic with respect to each other.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
