//! Health monitor: periodic reconciliation of node status.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use xgrid_core::epoch_secs;
use xgrid_state::{NodeRecord, NodeStatus, StateResult, StateStore, join_host_port};

use crate::checker::{ProbeResult, classify, http_probe, signed_probe};

/// Agent path probed on every node.
pub const HEALTH_PATH: &str = "/api/health";

/// Outcome of one monitoring tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    /// Node whose status could not be written, with the error.
    pub last_error: Option<(String, String)>,
}

impl CheckReport {
    fn record(&mut self, status: NodeStatus) {
        self.checked += 1;
        match status {
            NodeStatus::Online | NodeStatus::Syncing => self.online += 1,
            NodeStatus::Degraded => self.degraded += 1,
            NodeStatus::Offline => self.offline += 1,
        }
    }
}

/// Probe settings shared by every per-node check.
#[derive(Debug, Clone)]
struct ProbeSettings {
    timeout: Duration,
    stats_port: u16,
    stats_path: String,
}

/// Reconciles every node's status on a fixed interval.
pub struct HealthMonitor {
    store: StateStore,
    interval: Duration,
    probe: ProbeSettings,
}

impl HealthMonitor {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            interval: Duration::from_secs(30),
            probe: ProbeSettings {
                timeout: Duration::from_secs(10),
                stats_port: 8081,
                stats_path: "/stats".to_string(),
            },
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.probe.timeout = timeout;
        self
    }

    /// Port of the proxy engine's stats endpoint on each node.
    pub fn with_stats_port(mut self, port: u16) -> Self {
        self.probe.stats_port = port;
        self
    }

    pub fn with_stats_path(mut self, path: impl Into<String>) -> Self {
        self.probe.stats_path = path.into();
        self
    }

    /// Check every node once and write the resulting statuses.
    ///
    /// Each node is checked on its own task. A failed status write is logged
    /// and recorded in the report; the remaining nodes are still processed.
    pub async fn check_all(&self) -> StateResult<CheckReport> {
        let nodes = self.store.list_nodes()?;
        let mut tasks = JoinSet::new();
        for node in nodes {
            let probe = self.probe.clone();
            tasks.spawn(async move {
                let status = check_node(&node, &probe).await;
                (node, status)
            });
        }

        let mut report = CheckReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (node, status) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "health check task failed");
                    continue;
                }
            };
            if node.status != status {
                info!(node_id = %node.id, from = %node.status, to = %status, "node status changed");
            }
            match self.store.update_node_status(&node.id, status, epoch_secs()) {
                Ok(_) => report.record(status),
                Err(e) => {
                    error!(node_id = %node.id, error = %e, "failed to update node status");
                    report.last_error = Some((node.id.clone(), e.to_string()));
                }
            }
        }
        debug!(
            checked = report.checked,
            online = report.online,
            degraded = report.degraded,
            offline = report.offline,
            "health tick complete"
        );
        Ok(report)
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "health monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_all().await {
                        error!(error = %e, "failed to list nodes for health check");
                    }
                }
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Status of one node: signed agent probe, then the best-effort stats probe.
async fn check_node(node: &NodeRecord, probe: &ProbeSettings) -> NodeStatus {
    let Some(address) = node.agent_address() else {
        warn!(node_id = %node.id, "node has no reachable address");
        return NodeStatus::Offline;
    };

    let health = signed_probe(&address, HEALTH_PATH, &node.secret_key, probe.timeout).await;
    if !health.is_healthy() {
        debug!(node_id = %node.id, %address, result = ?health, "agent health probe failed");
        return classify(health, None);
    }

    let stats_address = join_host_port(node.probe_host(), probe.stats_port);
    let stats = http_probe(&stats_address, &probe.stats_path, &[], probe.timeout).await;
    if stats != ProbeResult::Healthy {
        debug!(node_id = %node.id, address = %stats_address, result = ?stats, "stats probe failed");
    }
    classify(health, Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use xgrid_core::security::{MASTER_SIGNATURE_HEADER, verify};

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    /// A port that was free a moment ago.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn agent(secret: &'static str) -> Router {
        Router::new().route(
            HEALTH_PATH,
            get(move |headers: HeaderMap| async move {
                let sig = headers
                    .get(MASTER_SIGNATURE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if verify(HEALTH_PATH.as_bytes(), secret, &sig) {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }),
        )
    }

    fn failing_agent() -> Router {
        Router::new().route(HEALTH_PATH, get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
    }

    fn node(id: &str, port: u16) -> NodeRecord {
        NodeRecord {
            id: id.into(),
            name: id.into(),
            master_url: String::new(),
            secret_key: "secret".into(),
            status: NodeStatus::Online,
            ip_address: "127.0.0.1".into(),
            hostname: String::new(),
            location: String::new(),
            xray_version: String::new(),
            listen_addr: format!(":{port}"),
            last_seen: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn monitor(store: &StateStore, stats_port: u16) -> HealthMonitor {
        HealthMonitor::new(store.clone())
            .with_timeout(Duration::from_secs(2))
            .with_stats_port(stats_port)
    }

    fn status_of(store: &StateStore, id: &str) -> NodeStatus {
        store.get_node(id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn failing_and_degraded_nodes_are_independent() {
        let store = StateStore::open_in_memory().unwrap();
        let bad = serve(failing_agent()).await;
        let good = serve(agent("secret")).await;
        store.put_node(&node("n-bad", bad)).unwrap();
        store.put_node(&node("n-good", good)).unwrap();

        let report = monitor(&store, closed_port().await).check_all().await.unwrap();

        assert_eq!(status_of(&store, "n-bad"), NodeStatus::Offline);
        assert_eq!(status_of(&store, "n-good"), NodeStatus::Degraded);
        assert_eq!(report.checked, 2);
        assert_eq!(report.offline, 1);
        assert_eq!(report.degraded, 1);
        assert!(report.last_error.is_none());
    }

    #[tokio::test]
    async fn healthy_agent_with_stats_is_online() {
        let store = StateStore::open_in_memory().unwrap();
        let agent_port = serve(agent("secret")).await;
        let stats_port = serve(Router::new().route("/stats", get(|| async { "{}" }))).await;
        let mut n = node("n1", agent_port);
        n.status = NodeStatus::Offline;
        store.put_node(&n).unwrap();

        let report = monitor(&store, stats_port).check_all().await.unwrap();

        let stored = store.get_node("n1").unwrap().unwrap();
        assert_eq!(stored.status, NodeStatus::Online);
        assert!(stored.last_seen > 0);
        assert_eq!(report.online, 1);
    }

    #[tokio::test]
    async fn wrong_secret_marks_offline() {
        let store = StateStore::open_in_memory().unwrap();
        let port = serve(agent("a-different-secret")).await;
        store.put_node(&node("n1", port)).unwrap();

        monitor(&store, closed_port().await).check_all().await.unwrap();
        assert_eq!(status_of(&store, "n1"), NodeStatus::Offline);
    }

    #[tokio::test]
    async fn unreachable_node_does_not_block_others() {
        let store = StateStore::open_in_memory().unwrap();
        let good = serve(agent("secret")).await;
        store.put_node(&node("n-down", closed_port().await)).unwrap();
        let mut nameless = node("n-nowhere", 0);
        nameless.ip_address = String::new();
        nameless.listen_addr = String::new();
        store.put_node(&nameless).unwrap();
        store.put_node(&node("n-up", good)).unwrap();

        let report = monitor(&store, closed_port().await).check_all().await.unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(status_of(&store, "n-down"), NodeStatus::Offline);
        assert_eq!(status_of(&store, "n-nowhere"), NodeStatus::Offline);
        assert_eq!(status_of(&store, "n-up"), NodeStatus::Degraded);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = StateStore::open_in_memory().unwrap();
        let monitor = monitor(&store, 1).with_interval(Duration::from_millis(50));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
