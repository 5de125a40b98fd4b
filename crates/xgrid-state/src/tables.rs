//! redb table definitions for the xgrid state store.
//!
//! Values are JSON-serialized domain types. Catalog records use their numeric
//! ID as the key so scans come back in ID order; join records use composite
//! `{left}:{right}` string keys.

use redb::TableDefinition;

/// Table keyed by a string.
pub type StrTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Table keyed by a numeric ID.
pub type IdTable = TableDefinition<'static, u64, &'static [u8]>;

/// Nodes keyed by `{node_id}`.
pub const NODES: StrTable = TableDefinition::new("nodes");

/// Node groups keyed by group ID.
pub const GROUPS: IdTable = TableDefinition::new("groups");

/// Group memberships keyed by `{group_id}:{node_id}`.
pub const MEMBERSHIPS: StrTable = TableDefinition::new("memberships");

/// Central inbounds keyed by inbound ID.
pub const INBOUNDS: IdTable = TableDefinition::new("inbounds");

/// Clients keyed by client ID.
pub const CLIENTS: IdTable = TableDefinition::new("clients");

/// Subscriptions keyed by subscription ID.
pub const SUBSCRIPTIONS: IdTable = TableDefinition::new("subscriptions");

/// Per-node client counters keyed by `{client_id}:{node_id}`.
pub const CLIENT_STATS: StrTable = TableDefinition::new("client_stats");
