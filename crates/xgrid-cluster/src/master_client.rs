//! Agent → controller client.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;
use xgrid_core::security::{NODE_SIGNATURE_HEADER, sign};
use xgrid_core::{ApiEnvelope, NodeStatsReport, RegisterNodeRequest, RegisterNodeResponse};

use crate::error::{ClientError, ClientResult};

/// HTTP client for the controller's node API.
#[derive(Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(master_url: &str, timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: master_url.trim_end_matches('/').to_string(),
        })
    }

    /// Register with the controller, signing with the registration secret.
    ///
    /// Anything but a successful response carrying a non-empty secret is an
    /// error.
    pub async fn register(
        &self,
        req: &RegisterNodeRequest,
        registration_secret: &str,
    ) -> ClientResult<RegisterNodeResponse> {
        let body = serde_json::to_vec(req)?;
        let signature = sign(&body, registration_secret);
        let resp = self
            .http
            .post(format!("{}/api/nodes/register", self.base_url))
            .header(NODE_SIGNATURE_HEADER, signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let data: RegisterNodeResponse = unwrap_envelope(resp).await?;
        if data.secret_key.is_empty() {
            return Err(ClientError::Rejected("missing secret key in response".into()));
        }
        debug!(node_id = %data.node_id, "registration accepted");
        Ok(data)
    }

    /// Post a telemetry heartbeat, signing the body.
    pub async fn post_stats(&self, node_id: &str, secret: &str, report: &NodeStatsReport) -> ClientResult<()> {
        let body = serde_json::to_vec(report)?;
        let signature = sign(&body, secret);
        let resp = self
            .http
            .post(format!("{}/api/nodes/{node_id}/stats", self.base_url))
            .header(NODE_SIGNATURE_HEADER, signature)
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

/// Decode `{success, data, error}`, requiring a 200 and `success: true`.
async fn unwrap_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> ClientResult<T> {
    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let envelope: ApiEnvelope<T> = resp.json().await?;
    if !envelope.success {
        return Err(ClientError::Rejected(
            envelope.error.unwrap_or_else(|| "controller reported failure".into()),
        ));
    }
    envelope
        .data
        .ok_or_else(|| ClientError::Rejected("response carried no data".into()))
}
