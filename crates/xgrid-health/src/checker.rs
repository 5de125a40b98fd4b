//! Probe logic.
//!
//! Plain HTTP/1 GETs over a fresh TCP connection, each bounded by a timeout.

use std::time::Duration;

use http::StatusCode;
use tracing::debug;
use xgrid_core::security::{MASTER_SIGNATURE_HEADER, sign};
use xgrid_state::NodeStatus;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint answered with the expected status.
    Healthy,
    /// The endpoint answered with another status.
    Unhealthy(StatusCode),
    /// Connection error or timeout.
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// GET `http://{address}{path}` with extra `headers`.
///
/// Only `200 OK` counts as healthy.
pub async fn http_probe(
    address: &str,
    path: &str,
    headers: &[(&str, &str)],
    timeout: Duration,
) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "xgrid-health/0.1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = match builder.body(http_body_util::Empty::<bytes::Bytes>::new()) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status() == StatusCode::OK => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "probe non-200");
                ProbeResult::Unhealthy(resp.status())
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeResult::Failed
        }
    }
}

/// [`http_probe`] carrying a controller signature over `path`.
pub async fn signed_probe(address: &str, path: &str, secret: &str, timeout: Duration) -> ProbeResult {
    let signature = sign(path.as_bytes(), secret);
    http_probe(address, path, &[(MASTER_SIGNATURE_HEADER, &signature)], timeout).await
}

/// Node status from the agent probe and, when it ran, the stats probe.
pub fn classify(health: ProbeResult, stats: Option<ProbeResult>) -> NodeStatus {
    match (health, stats) {
        (ProbeResult::Healthy, Some(ProbeResult::Healthy)) => NodeStatus::Online,
        (ProbeResult::Healthy, _) => NodeStatus::Degraded,
        _ => NodeStatus::Offline,
    }
}
