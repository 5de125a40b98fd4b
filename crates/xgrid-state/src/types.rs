//! Domain types for the xgrid state store.
//!
//! Nodes, groups, memberships, central inbounds, clients, subscriptions and
//! per-node client counters. All types are serializable to/from JSON for
//! storage in redb tables.
//!
//! Traffic and expiry gating is computed from these records at read time;
//! nothing in the store is pre-filtered.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node (opaque, chosen by the agent).
pub type NodeId = String;

/// Port an agent listens on when its listen address names none.
pub const DEFAULT_AGENT_PORT: u16 = 8080;

// ── Nodes ──────────────────────────────────────────────────────────

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Degraded,
    Syncing,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Degraded => "degraded",
            Self::Syncing => "syncing",
        }
    }

    /// Parse a reported status. Empty input reads as `online`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "degraded" => Some(Self::Degraded),
            "syncing" => Some(Self::Syncing),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proxy node managed by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    pub master_url: String,
    /// Shared secret for controller ↔ agent RPC. Issued once.
    pub secret_key: String,
    pub status: NodeStatus,
    pub ip_address: String,
    pub hostname: String,
    pub location: String,
    pub xray_version: String,
    /// Address the agent's RPC server binds, e.g. `:8080` or `10.0.0.5:9000`.
    pub listen_addr: String,
    /// Unix timestamp (seconds) of the last status write.
    pub last_seen: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl NodeRecord {
    /// Host advertised to end-user clients: hostname, else IP address.
    pub fn public_host(&self) -> &str {
        first_non_empty(&self.hostname, &self.ip_address)
    }

    /// `host:port` of the agent's RPC server.
    ///
    /// The host comes from the listen address when it names a concrete one,
    /// otherwise from the node's IP address or hostname. The port falls back
    /// to [`DEFAULT_AGENT_PORT`]. Returns `None` when no host is known.
    pub fn agent_address(&self) -> Option<String> {
        let (listen_host, listen_port) = split_listen_addr(&self.listen_addr);
        let host = listen_host
            .filter(|h| !is_unspecified(h))
            .unwrap_or_else(|| first_non_empty(&self.ip_address, &self.hostname));
        if host.is_empty() {
            return None;
        }
        let port = listen_port
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_AGENT_PORT);
        Some(join_host_port(host, port))
    }

    /// Host used for probes of the node's proxy engine: IP, else hostname.
    pub fn probe_host(&self) -> &str {
        first_non_empty(&self.ip_address, &self.hostname)
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.trim().is_empty() { b.trim() } else { a.trim() }
}

fn split_listen_addr(listen: &str) -> (Option<&str>, Option<&str>) {
    let listen = listen.trim();
    if listen.is_empty() {
        return (None, None);
    }
    if let Some(rest) = listen.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').filter(|p| !p.is_empty());
            return (Some(host).filter(|h| !h.is_empty()), port);
        }
    }
    match listen.rsplit_once(':') {
        Some((host, port)) => (
            Some(host).filter(|h| !h.is_empty()),
            Some(port).filter(|p| !p.is_empty()),
        ),
        None => (Some(listen), None),
    }
}

fn is_unspecified(host: &str) -> bool {
    host.trim_matches(':').is_empty()
        || host == "*"
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

// ── Groups ─────────────────────────────────────────────────────────

/// Named collection of nodes used to scope subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeGroup {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub active: bool,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

/// Node ↔ group membership. The weight belongs to the membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupMembership {
    pub group_id: u64,
    pub node_id: NodeId,
    /// Selection priority; higher sorts first.
    #[serde(default)]
    pub weight: i64,
    pub active: bool,
}

impl GroupMembership {
    /// Table key: `{group_id}:{node_id}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.group_id, self.node_id)
    }
}

// ── Inbounds ───────────────────────────────────────────────────────

/// Protocol endpoint template shared by every node in scope.
///
/// `settings`, `stream_settings` and `sniffing` hold raw JSON text; an empty
/// string means the section is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentralInbound {
    pub id: u64,
    /// Inbound tag.
    pub name: String,
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub settings: String,
    #[serde(default)]
    pub stream_settings: String,
    #[serde(default)]
    pub sniffing: String,
    /// Emit an `allocate` hint so the engine always keeps the inbound up.
    #[serde(default)]
    pub client_stats: bool,
    pub active: bool,
}

// ── Clients & subscriptions ────────────────────────────────────────

/// End-user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientRecord {
    pub id: u64,
    pub email: String,
    pub uuid: String,
    /// External subscription reference, if any.
    #[serde(default)]
    pub subscription_ref: String,
    /// Global traffic ceiling in bytes; 0 means unlimited.
    #[serde(default)]
    pub traffic_limit: i64,
    #[serde(default)]
    pub used_traffic: i64,
    /// Unix seconds after which the client is expired.
    #[serde(default)]
    pub expire_at: Option<u64>,
    pub active: bool,
}

impl ClientRecord {
    /// Active and not expired. The global traffic ceiling is reported to
    /// nodes but never gates access; subscriptions carry the enforced quota.
    pub fn is_eligible(&self, now: u64) -> bool {
        self.active && !is_expired(self.expire_at, now)
    }
}

/// A client's access to one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: u64,
    pub client_id: u64,
    pub group_id: u64,
    #[serde(default)]
    pub expire_at: Option<u64>,
    /// Traffic ceiling for this group in bytes; 0 means unlimited.
    #[serde(default)]
    pub traffic_limit: i64,
    #[serde(default)]
    pub used_traffic: i64,
    pub active: bool,
}

impl Subscription {
    /// Active, not expired and under its traffic ceiling.
    pub fn is_usable(&self, now: u64) -> bool {
        self.active
            && !is_expired(self.expire_at, now)
            && !is_over_quota(self.traffic_limit, self.used_traffic)
    }
}

/// Expired when the expiry lies strictly in the past.
pub fn is_expired(expire_at: Option<u64>, now: u64) -> bool {
    expire_at.is_some_and(|at| at < now)
}

/// Over quota when a positive limit is set and usage has reached it.
pub fn is_over_quota(limit: i64, used: i64) -> bool {
    limit > 0 && used >= limit
}

// ── Telemetry ──────────────────────────────────────────────────────

/// Last-known traffic counters for one (client, node) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientNodeStat {
    pub client_id: u64,
    pub node_id: NodeId,
    pub upload: i64,
    pub download: i64,
    pub last_used: Option<u64>,
    pub updated_at: u64,
}

impl ClientNodeStat {
    /// Table key: `{client_id}:{node_id}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.client_id, self.node_id)
    }
}
