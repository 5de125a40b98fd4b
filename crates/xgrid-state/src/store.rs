//! StateStore: redb-backed persistence for the xgrid controller.
//!
//! Provides typed operations over nodes, groups, memberships, central
//! inbounds, clients, subscriptions and client counters. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, Key, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(GROUPS).map_err(map_err!(Table))?;
        txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        txn.open_table(INBOUNDS).map_err(map_err!(Table))?;
        txn.open_table(CLIENTS).map_err(map_err!(Table))?;
        txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
        txn.open_table(CLIENT_STATS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Register (or re-register) a node in one write transaction.
    ///
    /// An existing record keeps its secret and creation time; every other
    /// field is replaced by `node`. A new record gets its secret from
    /// `issue_secret`, which is only called when the node is unknown.
    /// Returns the stored record and whether it was newly created.
    pub fn register_node<F>(&self, mut node: NodeRecord, issue_secret: F) -> StateResult<(NodeRecord, bool)>
    where
        F: FnOnce() -> StateResult<String>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let existing: Option<NodeRecord> = match table.get(node.id.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            };
            match existing {
                Some(prev) if !prev.secret_key.is_empty() => {
                    node.secret_key = prev.secret_key;
                    node.created_at = prev.created_at;
                    created = false;
                }
                Some(prev) => {
                    node.secret_key = issue_secret()?;
                    node.created_at = prev.created_at;
                    created = false;
                }
                None => {
                    node.secret_key = issue_secret()?;
                    created = true;
                }
            }
            let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
            table
                .insert(node.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node_id = %node.id, created, "node registered");
        Ok((node, created))
    }

    /// Insert or replace a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        self.put_str(NODES, &node.id, node)
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<NodeRecord>> {
        self.get_str(NODES, node_id)
    }

    /// List all nodes, ordered by ID.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        self.list(NODES)
    }

    /// Set a node's status and refresh its last-seen time.
    ///
    /// Returns false if the node does not exist.
    pub fn update_node_status(&self, node_id: &str, status: NodeStatus, now: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let existing: Option<NodeRecord> = match table.get(node_id).map_err(map_err!(Read))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            };
            found = existing.is_some();
            if let Some(mut node) = existing {
                node.status = status;
                node.last_seen = now;
                node.updated_at = now;
                let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
                table
                    .insert(node_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    /// Delete a node together with its memberships and client counters.
    ///
    /// Returns true if the node existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = nodes.remove(node_id).map_err(map_err!(Write))?.is_some();

            let mut memberships = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
            let keys = matching_keys(&memberships, |m: GroupMembership| m.node_id == node_id)?;
            for key in &keys {
                memberships.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let mut stats = txn.open_table(CLIENT_STATS).map_err(map_err!(Table))?;
            let keys = matching_keys(&stats, |s: ClientNodeStat| s.node_id == node_id)?;
            for key in &keys {
                stats.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%node_id, existed, "node deleted");
        Ok(existed)
    }

    // ── Groups & memberships ───────────────────────────────────────

    pub fn put_group(&self, group: &NodeGroup) -> StateResult<()> {
        self.put_id(GROUPS, group.id, group)
    }

    pub fn get_group(&self, group_id: u64) -> StateResult<Option<NodeGroup>> {
        self.get_id(GROUPS, group_id)
    }

    pub fn list_groups(&self) -> StateResult<Vec<NodeGroup>> {
        self.list(GROUPS)
    }

    /// Insert or update a membership (keyed by group and node).
    pub fn put_membership(&self, membership: &GroupMembership) -> StateResult<()> {
        self.put_str(MEMBERSHIPS, &membership.table_key(), membership)
    }

    pub fn list_memberships(&self) -> StateResult<Vec<GroupMembership>> {
        self.list(MEMBERSHIPS)
    }

    /// Memberships of one node, in group ID order.
    pub fn list_memberships_for_node(&self, node_id: &str) -> StateResult<Vec<GroupMembership>> {
        let mut found: Vec<GroupMembership> = self
            .list_memberships()?
            .into_iter()
            .filter(|m| m.node_id == node_id)
            .collect();
        found.sort_by_key(|m| m.group_id);
        Ok(found)
    }

    /// Memberships of one group.
    pub fn list_memberships_for_group(&self, group_id: u64) -> StateResult<Vec<GroupMembership>> {
        Ok(self
            .list_memberships()?
            .into_iter()
            .filter(|m| m.group_id == group_id)
            .collect())
    }

    // ── Inbounds ───────────────────────────────────────────────────

    pub fn put_inbound(&self, inbound: &CentralInbound) -> StateResult<()> {
        self.put_id(INBOUNDS, inbound.id, inbound)
    }

    pub fn list_inbounds(&self) -> StateResult<Vec<CentralInbound>> {
        self.list(INBOUNDS)
    }

    // ── Clients & subscriptions ────────────────────────────────────

    pub fn put_client(&self, client: &ClientRecord) -> StateResult<()> {
        self.put_id(CLIENTS, client.id, client)
    }

    pub fn get_client(&self, client_id: u64) -> StateResult<Option<ClientRecord>> {
        self.get_id(CLIENTS, client_id)
    }

    /// Look a client up by UUID.
    pub fn find_client_by_uuid(&self, uuid: &str) -> StateResult<Option<ClientRecord>> {
        Ok(self.list_clients()?.into_iter().find(|c| c.uuid == uuid))
    }

    pub fn list_clients(&self) -> StateResult<Vec<ClientRecord>> {
        self.list(CLIENTS)
    }

    pub fn put_subscription(&self, sub: &Subscription) -> StateResult<()> {
        self.put_id(SUBSCRIPTIONS, sub.id, sub)
    }

    pub fn list_subscriptions(&self) -> StateResult<Vec<Subscription>> {
        self.list(SUBSCRIPTIONS)
    }

    /// Subscriptions held by one client, in subscription ID order.
    pub fn list_subscriptions_for_client(&self, client_id: u64) -> StateResult<Vec<Subscription>> {
        Ok(self
            .list_subscriptions()?
            .into_iter()
            .filter(|s| s.client_id == client_id)
            .collect())
    }

    // ── Client counters ────────────────────────────────────────────

    /// Insert or overwrite the counters for one (client, node) pair.
    pub fn upsert_client_stat(&self, stat: &ClientNodeStat) -> StateResult<()> {
        self.put_str(CLIENT_STATS, &stat.table_key(), stat)
    }

    pub fn list_client_stats(&self) -> StateResult<Vec<ClientNodeStat>> {
        self.list(CLIENT_STATS)
    }

    // ── Table helpers ──────────────────────────────────────────────

    fn put_str<T: Serialize>(&self, def: StrTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = def.name(), %key, "record stored");
        Ok(())
    }

    fn get_str<T: DeserializeOwned>(&self, def: StrTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_id<T: Serialize>(&self, def: IdTable, key: u64, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = def.name(), key, "record stored");
        Ok(())
    }

    fn get_id<T: DeserializeOwned>(&self, def: IdTable, key: u64) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<K: Key + 'static, T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, K, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }
}

/// Keys of every row in a string-keyed table whose value matches `pred`.
fn matching_keys<T, P>(table: &impl ReadableTable<&'static str, &'static [u8]>, pred: P) -> StateResult<Vec<String>>
where
    T: DeserializeOwned,
    P: Fn(T) -> bool,
{
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        if pred(record) {
            keys.push(key.value().to_string());
        }
    }
    Ok(keys)
}
