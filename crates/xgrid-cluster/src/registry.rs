//! Registry: controller-side node bookkeeping.
//!
//! Transport-free: handlers pass in the raw bytes that were signed and the
//! signature header value, and map [`RegistryError::kind`] to a status code.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};
use xgrid_core::security::{NODE_SECRET_BYTES, generate_secret, verify};
use xgrid_core::{NodeConfig, NodeStatsReport, RegisterNodeRequest, RegisterNodeResponse, epoch_secs};
use xgrid_distribution::ConfigService;
use xgrid_state::{
    ClientNodeStat, NodeGroup, NodeRecord, NodeStatus, StateError, StateStore,
};

use crate::error::{RegistryError, RegistryResult};

/// Window in which a client counts as online.
const ONLINE_USER_WINDOW_SECS: u64 = 10 * 60;

/// Window summed for the traffic figure.
const TRAFFIC_WINDOW_SECS: u64 = 24 * 60 * 60;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Aggregate fleet metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub total_nodes: usize,
    /// Online or syncing.
    pub online_nodes: usize,
    pub degraded_nodes: usize,
    pub offline_nodes: usize,
    pub online_users: usize,
    pub traffic_24h_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRef {
    pub id: u64,
    pub name: String,
}

/// Operator view of a node. The secret is never included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub name: String,
    pub status: NodeStatus,
    pub ip_address: String,
    pub hostname: String,
    pub location: String,
    pub xray_version: String,
    pub listen_addr: String,
    pub last_seen: u64,
    pub groups: Vec<GroupRef>,
}

/// Node registry and signed-request gatekeeper.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    config: ConfigService,
    registration_secret: String,
}

impl Registry {
    pub fn new(store: StateStore, registration_secret: impl Into<String>) -> Self {
        let config = ConfigService::new(store.clone());
        Self {
            store,
            config,
            registration_secret: registration_secret.into(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config_service(&self) -> &ConfigService {
        &self.config
    }

    /// Register or re-register a node.
    ///
    /// `body` must be signed with the registration secret. A known node keeps
    /// its secret; an unknown node gets a fresh one. Repeated calls with the
    /// same ID update the record in place.
    pub fn register_node(&self, body: &[u8], signature: Option<&str>) -> RegistryResult<RegisterNodeResponse> {
        let signature = signature.filter(|s| !s.is_empty()).ok_or_else(|| {
            warn!("registration without signature");
            RegistryError::Unauthorized("invalid signature")
        })?;
        if self.registration_secret.is_empty() || !verify(body, &self.registration_secret, signature) {
            warn!("registration with invalid signature");
            return Err(RegistryError::Unauthorized("invalid signature"));
        }

        let req: RegisterNodeRequest =
            serde_json::from_slice(body).map_err(|e| RegistryError::InvalidPayload(e.to_string()))?;
        if req.id.trim().is_empty() {
            return Err(RegistryError::InvalidPayload("node id is required".into()));
        }

        let now = epoch_secs();
        let node = NodeRecord {
            name: if req.name.is_empty() { req.id.clone() } else { req.name },
            id: req.id,
            master_url: req.master_url,
            secret_key: String::new(),
            status: NodeStatus::Online,
            ip_address: req.ip_address,
            hostname: req.hostname,
            location: req.location,
            xray_version: req.xray_version,
            listen_addr: req.listen_addr,
            last_seen: now,
            created_at: now,
            updated_at: now,
        };
        let (node, created) = self.store.register_node(node, || {
            generate_secret(NODE_SECRET_BYTES).map_err(|e| StateError::Secret(e.to_string()))
        })?;

        if created {
            info!(node_id = %node.id, name = %node.name, "node registered");
        } else {
            info!(node_id = %node.id, "node re-registered");
        }
        Ok(RegisterNodeResponse {
            node_id: node.id,
            secret_key: node.secret_key,
            status: node.status.to_string(),
        })
    }

    /// Verify `signature` over `message` with the node's own secret.
    pub fn authenticate_node(
        &self,
        node_id: &str,
        message: &[u8],
        signature: Option<&str>,
    ) -> RegistryResult<NodeRecord> {
        if node_id.is_empty() {
            return Err(RegistryError::Unauthorized("invalid signature"));
        }
        let Some(node) = self.store.get_node(node_id)? else {
            warn!(%node_id, "signed request from unknown node");
            return Err(RegistryError::Unauthorized("invalid signature"));
        };
        let Some(signature) = signature.filter(|s| !s.is_empty()) else {
            warn!(%node_id, "request without signature");
            return Err(RegistryError::Unauthorized("invalid signature"));
        };
        if node.secret_key.is_empty() || !verify(message, &node.secret_key, signature) {
            warn!(%node_id, "request with invalid signature");
            return Err(RegistryError::Unauthorized("invalid signature"));
        }
        Ok(node)
    }

    /// Computed configuration for a node; `path` is what the node signed.
    pub fn node_config(&self, node_id: &str, path: &str, signature: Option<&str>) -> RegistryResult<NodeConfig> {
        self.authenticate_node(node_id, path.as_bytes(), signature)?;
        let config = self.config.node_config(node_id)?;
        debug!(%node_id, clients = config.clients.len(), "config served");
        Ok(config)
    }

    /// Ingest a signed telemetry heartbeat.
    ///
    /// Updates the node status (empty means online) and upserts one counter
    /// row per reported client.
    pub fn receive_stats(&self, node_id: &str, body: &[u8], signature: Option<&str>) -> RegistryResult<()> {
        self.authenticate_node(node_id, body, signature)?;
        let report: NodeStatsReport =
            serde_json::from_slice(body).map_err(|e| RegistryError::InvalidPayload(e.to_string()))?;
        let status = NodeStatus::parse(&report.status)
            .ok_or_else(|| RegistryError::InvalidPayload(format!("unknown status {:?}", report.status)))?;

        let now = epoch_secs();
        self.store.update_node_status(node_id, status, now)?;
        for client in &report.clients {
            self.store.upsert_client_stat(&ClientNodeStat {
                client_id: client.client_id,
                node_id: node_id.to_string(),
                upload: client.upload,
                download: client.download,
                last_used: client.last_used,
                updated_at: now,
            })?;
        }
        debug!(
            %node_id,
            %status,
            cpu = report.cpu_usage,
            memory = report.memory_usage,
            clients = report.clients.len(),
            "stats received"
        );
        Ok(())
    }

    pub fn dashboard(&self) -> RegistryResult<Dashboard> {
        self.dashboard_at(epoch_secs())
    }

    pub fn dashboard_at(&self, now: u64) -> RegistryResult<Dashboard> {
        let nodes = self.store.list_nodes()?;
        let count = |pred: fn(NodeStatus) -> bool| nodes.iter().filter(|n| pred(n.status)).count();

        let stats = self.store.list_client_stats()?;
        let online_users: HashSet<u64> = stats
            .iter()
            .filter(|s| s.last_used.is_some_and(|t| t + ONLINE_USER_WINDOW_SECS >= now))
            .map(|s| s.client_id)
            .collect();
        let traffic_bytes: i64 = stats
            .iter()
            .filter(|s| s.updated_at + TRAFFIC_WINDOW_SECS >= now)
            .map(|s| s.upload + s.download)
            .sum();

        Ok(Dashboard {
            total_nodes: nodes.len(),
            online_nodes: count(|s| matches!(s, NodeStatus::Online | NodeStatus::Syncing)),
            degraded_nodes: count(|s| s == NodeStatus::Degraded),
            offline_nodes: count(|s| s == NodeStatus::Offline),
            online_users: online_users.len(),
            traffic_24h_gb: traffic_bytes as f64 / BYTES_PER_GB,
        })
    }

    /// Every node with the groups it belongs to.
    pub fn list_nodes(&self) -> RegistryResult<Vec<NodeSummary>> {
        let groups: HashMap<u64, NodeGroup> = self
            .store
            .list_groups()?
            .into_iter()
            .map(|g| (g.id, g))
            .collect();

        let mut out = Vec::new();
        for node in self.store.list_nodes()? {
            let refs = self
                .store
                .list_memberships_for_node(&node.id)?
                .iter()
                .filter_map(|m| groups.get(&m.group_id))
                .map(|g| GroupRef {
                    id: g.id,
                    name: g.name.clone(),
                })
                .collect();
            out.push(NodeSummary {
                id: node.id,
                name: node.name,
                status: node.status,
                ip_address: node.ip_address,
                hostname: node.hostname,
                location: node.location,
                xray_version: node.xray_version,
                listen_addr: node.listen_addr,
                last_seen: node.last_seen,
                groups: refs,
            });
        }
        Ok(out)
    }

    /// Remove a node. Operator action only.
    pub fn delete_node(&self, node_id: &str) -> RegistryResult<()> {
        if self.store.delete_node(node_id)? {
            info!(%node_id, "node deleted");
            Ok(())
        } else {
            Err(RegistryError::NodeNotFound(node_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use xgrid_core::security::sign;
    use xgrid_state::GroupMembership;

    const REG: &str = "registration-secret";

    fn registry() -> Registry {
        Registry::new(StateStore::open_in_memory().unwrap(), REG)
    }

    fn register_body(id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "name": "Edge 1",
            "master_url": "http://master:8085",
            "ip_address": "10.0.0.5",
            "hostname": "edge1",
            "listen_addr": ":8080"
        }))
        .unwrap()
    }

    fn register(reg: &Registry, id: &str) -> RegisterNodeResponse {
        let body = register_body(id);
        reg.register_node(&body, Some(&sign(&body, REG))).unwrap()
    }

    #[test]
    fn registration_is_idempotent() {
        let reg = registry();
        let first = register(&reg, "n1");
        let second = register(&reg, "n1");

        assert_eq!(first.node_id, "n1");
        assert_eq!(first.status, "online");
        assert_eq!(first.secret_key.len(), NODE_SECRET_BYTES * 2);
        assert_eq!(first.secret_key, second.secret_key);
        assert_eq!(reg.store().list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn registration_requires_registration_secret() {
        let reg = registry();
        let body = register_body("n1");

        let err = reg.register_node(&body, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let err = reg.register_node(&body, Some(&sign(&body, "wrong"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(reg.store().list_nodes().unwrap().is_empty());
    }

    #[test]
    fn registration_validates_payload() {
        let reg = registry();
        let body = b"not json".to_vec();
        let err = reg.register_node(&body, Some(&sign(&body, REG))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let body = serde_json::to_vec(&json!({"name": "anon"})).unwrap();
        let err = reg.register_node(&body, Some(&sign(&body, REG))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn re_registration_restores_online_status() {
        let reg = registry();
        register(&reg, "n1");
        reg.store().update_node_status("n1", NodeStatus::Offline, 1).unwrap();
        register(&reg, "n1");
        assert_eq!(reg.store().get_node("n1").unwrap().unwrap().status, NodeStatus::Online);
    }

    #[test]
    fn node_requests_use_node_secret() {
        let reg = registry();
        let secret = register(&reg, "n1").secret_key;
        let path = "/api/nodes/n1/config";

        let cfg = reg.node_config("n1", path, Some(&sign(path.as_bytes(), &secret))).unwrap();
        assert_eq!(cfg.outbounds.len(), 2);

        // The registration secret is not a node credential.
        let err = reg.node_config("n1", path, Some(&sign(path.as_bytes(), REG))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let err = reg.node_config("ghost", path, Some(&sign(path.as_bytes(), &secret))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn stats_update_status_and_counters() {
        let reg = registry();
        let secret = register(&reg, "n1").secret_key;
        let body = serde_json::to_vec(&json!({
            "status": "degraded",
            "cpu_usage": 12.5,
            "memory_usage": 40.0,
            "online_users": 1,
            "clients": [{"client_id": 7, "upload": 100, "download": 200, "last_used": 1_700_000_000u64}]
        }))
        .unwrap();

        reg.receive_stats("n1", &body, Some(&sign(&body, &secret))).unwrap();

        assert_eq!(reg.store().get_node("n1").unwrap().unwrap().status, NodeStatus::Degraded);
        let stats = reg.store().list_client_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].client_id, 7);
        assert_eq!(stats[0].download, 200);
    }

    #[test]
    fn stats_with_empty_status_mean_online() {
        let reg = registry();
        let secret = register(&reg, "n1").secret_key;
        reg.store().update_node_status("n1", NodeStatus::Offline, 1).unwrap();

        let body = br#"{"status":"","clients":[]}"#;
        reg.receive_stats("n1", body, Some(&sign(body, &secret))).unwrap();
        assert_eq!(reg.store().get_node("n1").unwrap().unwrap().status, NodeStatus::Online);

        let body = br#"{"status":"melting"}"#;
        let err = reg.receive_stats("n1", body, Some(&sign(body, &secret))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn tampered_stats_are_rejected() {
        let reg = registry();
        let secret = register(&reg, "n1").secret_key;
        let body = br#"{"status":"online"}"#;
        let sig = sign(body, &secret);
        let err = reg
            .receive_stats("n1", br#"{"status":"offline"}"#, Some(&sig))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn dashboard_aggregates() {
        let reg = registry();
        let now = 1_700_000_000;
        register(&reg, "a");
        register(&reg, "b");
        register(&reg, "c");
        reg.store().update_node_status("b", NodeStatus::Degraded, now).unwrap();
        reg.store().update_node_status("c", NodeStatus::Offline, now).unwrap();

        let gb = 1024 * 1024 * 1024;
        let stat = |client_id, node: &str, last_used: Option<u64>, updated_at| ClientNodeStat {
            client_id,
            node_id: node.into(),
            upload: gb,
            download: gb,
            last_used,
            updated_at,
        };
        let store = reg.store();
        store.upsert_client_stat(&stat(1, "a", Some(now - 60), now)).unwrap();
        store.upsert_client_stat(&stat(1, "b", Some(now - 30), now)).unwrap();
        store.upsert_client_stat(&stat(2, "a", Some(now - 3600), now - 2 * 86_400)).unwrap();

        let d = reg.dashboard_at(now).unwrap();
        assert_eq!(d.total_nodes, 3);
        assert_eq!(d.online_nodes, 1);
        assert_eq!(d.degraded_nodes, 1);
        assert_eq!(d.offline_nodes, 1);
        assert_eq!(d.online_users, 1);
        assert!((d.traffic_24h_gb - 4.0).abs() < 1e-9);
    }

    #[test]
    fn node_listing_includes_groups_without_secrets() {
        let reg = registry();
        register(&reg, "n1");
        let store = reg.store();
        store
            .put_group(&NodeGroup {
                id: 3,
                name: "eu".into(),
                description: String::new(),
                active: true,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        store
            .put_membership(&GroupMembership {
                group_id: 3,
                node_id: "n1".into(),
                weight: 1,
                active: true,
            })
            .unwrap();

        let nodes = reg.list_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].groups, vec![GroupRef { id: 3, name: "eu".into() }]);
        let rendered = serde_json::to_string(&nodes).unwrap();
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn delete_unknown_node_is_not_found() {
        let reg = registry();
        register(&reg, "n1");
        reg.delete_node("n1").unwrap();
        assert_eq!(reg.delete_node("n1").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
