//! ConfigService: per-node configuration snapshots.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Value, json};
use tracing::debug;
use xgrid_core::document::Document;
use xgrid_core::{NodeConfig, epoch_secs};
use xgrid_state::{ClientRecord, StateStore, Subscription};

use crate::error::{DistributionError, DistributionResult};
use crate::inbound::ResolvedInbound;

/// Computes node configurations from the state store.
#[derive(Clone)]
pub struct ConfigService {
    store: StateStore,
}

impl ConfigService {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Configuration for `node_id`, evaluated against the current time.
    pub fn node_config(&self, node_id: &str) -> DistributionResult<NodeConfig> {
        self.node_config_at(node_id, epoch_secs())
    }

    /// Configuration for `node_id` with expiry evaluated at `now`.
    pub fn node_config_at(&self, node_id: &str, now: u64) -> DistributionResult<NodeConfig> {
        if node_id.is_empty() {
            return Err(DistributionError::MissingNodeId);
        }
        if self.store.get_node(node_id)?.is_none() {
            return Err(DistributionError::NodeNotFound(node_id.to_string()));
        }

        let groups = self.active_groups_of(node_id)?;
        let inbounds = self
            .active_inbounds()?
            .iter()
            .map(ResolvedInbound::to_document)
            .collect();
        let clients = self.eligible_clients(&groups, now)?;
        debug!(%node_id, groups = groups.len(), clients = clients.len(), "node config computed");

        Ok(NodeConfig {
            inbounds,
            outbounds: default_outbounds(),
            clients,
            log: Some(object(json!({"loglevel": "info"}))),
            last_updated_at: now,
            ..NodeConfig::default()
        })
    }

    /// Every active central inbound, decoded, in ID order.
    pub fn active_inbounds(&self) -> DistributionResult<Vec<ResolvedInbound>> {
        self.store
            .list_inbounds()?
            .iter()
            .filter(|inbound| inbound.active)
            .map(ResolvedInbound::resolve)
            .collect()
    }

    /// Groups the node belongs to through an active membership in an active group.
    fn active_groups_of(&self, node_id: &str) -> DistributionResult<HashSet<u64>> {
        let mut groups = HashSet::new();
        for membership in self.store.list_memberships_for_node(node_id)? {
            if !membership.active {
                continue;
            }
            if let Some(group) = self.store.get_group(membership.group_id)? {
                if group.active {
                    groups.insert(group.id);
                }
            }
        }
        Ok(groups)
    }

    /// Client entries for everyone holding a usable subscription in `groups`.
    ///
    /// When a client qualifies through several subscriptions, the one with
    /// the lowest ID supplies the per-subscription fields.
    fn eligible_clients(&self, groups: &HashSet<u64>, now: u64) -> DistributionResult<Vec<Document>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_client: BTreeMap<u64, Subscription> = BTreeMap::new();
        for sub in self.store.list_subscriptions()? {
            if groups.contains(&sub.group_id) && sub.is_usable(now) {
                by_client.entry(sub.client_id).or_insert(sub);
            }
        }

        let mut entries = Vec::with_capacity(by_client.len());
        for (client_id, sub) in &by_client {
            let Some(client) = self.store.get_client(*client_id)? else {
                continue;
            };
            if client.is_eligible(now) {
                entries.push(client_entry(&client, sub));
            }
        }
        Ok(entries)
    }
}

fn client_entry(client: &ClientRecord, sub: &Subscription) -> Document {
    let mut entry = Document::new();
    entry.insert("id".into(), Value::String(client.uuid.clone()));
    entry.insert("email".into(), Value::String(client.email.clone()));
    entry.insert("subscriptionId".into(), Value::from(sub.id));
    entry.insert("trafficLimit".into(), Value::from(sub.traffic_limit));
    entry.insert("usedTraffic".into(), Value::from(sub.used_traffic));
    if !client.subscription_ref.is_empty() {
        entry.insert("subscriptionRef".into(), Value::String(client.subscription_ref.clone()));
    }
    if client.traffic_limit > 0 {
        entry.insert("globalTrafficLimit".into(), Value::from(client.traffic_limit));
        entry.insert("globalUsedTraffic".into(), Value::from(client.used_traffic));
    }
    if let Some(expire_at) = client.expire_at {
        entry.insert("expireAt".into(), Value::from(expire_at));
    }
    entry
}

/// `direct`/freedom and `blocked`/blackhole.
pub fn default_outbounds() -> Vec<Document> {
    vec![
        object(json!({"tag": "direct", "protocol": "freedom", "settings": {}})),
        object(json!({"tag": "blocked", "protocol": "blackhole", "settings": {}})),
    ]
}

fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
