//! Controller → agent RPC client.
//!
//! Every call is signed with the target node's secret in
//! `X-Master-Signature`: over the JSON body when there is one, over the
//! request path otherwise.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use xgrid_core::security::{MASTER_SIGNATURE_HEADER, sign};
use xgrid_core::{ProxyConfig, SyncAction, SyncRequest, epoch_secs};
use xgrid_distribution::ConfigService;
use xgrid_state::{NodeRecord, StateResult, StateStore};

use crate::error::{ClientError, ClientResult};

/// Outcome of a bulk push.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    /// Most recent per-node failure, as `"<node>: <error>"`.
    pub last_error: Option<String>,
}

/// HTTP client for the agent's signed endpoints.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Send `config` to the node's `/api/sync` with `action`.
    pub async fn push_config(
        &self,
        node: &NodeRecord,
        action: SyncAction,
        config: &ProxyConfig,
    ) -> ClientResult<()> {
        let body = serde_json::to_vec(&SyncRequest {
            action: action.as_str().to_string(),
            config: config.clone(),
            timestamp: epoch_secs(),
        })?;
        let signature = sign(&body, &node.secret_key);
        self.post(node, "/api/sync", body, signature).await?;
        info!(node_id = %node.id, action = action.as_str(), "config pushed");
        Ok(())
    }

    /// Ask the agent to restart its proxy engine.
    pub async fn restart(&self, node: &NodeRecord) -> ClientResult<()> {
        let path = "/api/restart";
        let signature = sign(path.as_bytes(), &node.secret_key);
        self.post(node, path, Vec::new(), signature).await
    }

    /// Ask the agent to (re)install its proxy engine.
    pub async fn update(&self, node: &NodeRecord) -> ClientResult<()> {
        let body = b"{}".to_vec();
        let signature = sign(&body, &node.secret_key);
        self.post(node, "/api/update", body, signature).await
    }

    /// Compute the node's configuration and push it with `apply_config`.
    pub async fn sync_node(&self, config: &ConfigService, node: &NodeRecord) -> ClientResult<()> {
        let proxy = config.node_config(&node.id)?.into_proxy_config();
        self.push_config(node, SyncAction::ApplyConfig, &proxy).await
    }

    /// Push configuration to every node.
    ///
    /// A failing node is counted and logged; the remaining nodes are still
    /// processed.
    pub async fn sync_all(&self, store: &StateStore, config: &ConfigService) -> StateResult<SyncReport> {
        let mut report = SyncReport::default();
        for node in store.list_nodes()? {
            match self.sync_node(config, &node).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!(node_id = %node.id, error = %e, "config push failed");
                    report.failed += 1;
                    report.last_error = Some(format!("{}: {e}", node.id));
                }
            }
        }
        debug!(synced = report.synced, failed = report.failed, "bulk sync complete");
        Ok(report)
    }

    async fn post(&self, node: &NodeRecord, path: &str, body: Vec<u8>, signature: String) -> ClientResult<()> {
        let address = node
            .agent_address()
            .ok_or_else(|| ClientError::NoAddress(node.id.clone()))?;
        let url = format!("http://{address}{path}");

        let resp = self
            .http
            .post(&url)
            .header(MASTER_SIGNATURE_HEADER, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
