//! Wire types shared by the controller and node agents.

use serde::{Deserialize, Serialize};

use crate::document::{Document, deep_clone, deep_clone_all};

// ── Registration ───────────────────────────────────────────────────

/// Body of `POST /api/nodes/register`, signed with the registration secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterNodeRequest {
    pub id: String,
    pub name: String,
    pub master_url: String,
    pub ip_address: String,
    pub hostname: String,
    pub location: String,
    pub xray_version: String,
    pub listen_addr: String,
}

/// Payload returned by a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub node_id: String,
    pub secret_key: String,
    pub status: String,
}

// ── Envelope ───────────────────────────────────────────────────────

/// `{success, data, error}` wrapper used by every controller JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Telemetry ──────────────────────────────────────────────────────

/// Heartbeat body of `POST /api/nodes/{id}/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatsReport {
    /// Reported node status; empty means `online`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub online_users: u64,
    #[serde(default)]
    pub clients: Vec<ClientStatReport>,
}

/// Per-client traffic counters observed on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStatReport {
    pub client_id: u64,
    #[serde(default)]
    pub upload: i64,
    #[serde(default)]
    pub download: i64,
    /// Unix seconds of the last observed activity.
    #[serde(default)]
    pub last_used: Option<u64>,
}

// ── Configuration push ─────────────────────────────────────────────

/// Proxy configuration as pushed to an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub inbounds: Vec<Document>,
    pub outbounds: Vec<Document>,
    pub clients: Vec<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_sections: Option<Document>,
}

impl ProxyConfig {
    /// Structural copy sharing no nested values with `self`.
    pub fn deep_clone(&self) -> Self {
        Self {
            inbounds: deep_clone_all(&self.inbounds),
            outbounds: deep_clone_all(&self.outbounds),
            clients: deep_clone_all(&self.clients),
            routing: self.routing.as_ref().map(deep_clone),
            dns: self.dns.as_ref().map(deep_clone),
            policy: self.policy.as_ref().map(deep_clone),
            transport: self.transport.as_ref().map(deep_clone),
            log: self.log.as_ref().map(deep_clone),
            other_sections: self.other_sections.as_ref().map(deep_clone),
        }
    }
}

/// Body of the agent's `POST /api/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub action: String,
    #[serde(default)]
    pub config: ProxyConfig,
    #[serde(default)]
    pub timestamp: u64,
}

/// Actions understood by the agent's sync endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Replace the whole runtime configuration.
    ApplyConfig,
    /// Replace only the client list of the current configuration.
    UpdateClients,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyConfig => "apply_config",
            Self::UpdateClients => "update_clients",
        }
    }

    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "apply_config" => Some(Self::ApplyConfig),
            "update_clients" => Some(Self::UpdateClients),
            _ => None,
        }
    }
}

/// Per-node configuration computed by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub inbounds: Vec<Document>,
    pub outbounds: Vec<Document>,
    pub clients: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Document>,
    /// Unix seconds at which this snapshot was computed.
    pub last_updated_at: u64,
}

impl NodeConfig {
    pub fn into_proxy_config(self) -> ProxyConfig {
        ProxyConfig {
            inbounds: self.inbounds,
            outbounds: self.outbounds,
            clients: self.clients,
            routing: self.routing,
            dns: self.dns,
            policy: self.policy,
            transport: self.transport,
            log: self.log,
            other_sections: None,
        }
    }
}
