//! Fleet integration tests.
//!
//! A real controller and a real agent talk over loopback HTTP: registration,
//! membership-driven config distribution, push sync and health reconciliation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use xgrid_agent::{Agent, AgentConfig, AgentPhase, Supervisor, SupervisorFuture};
use xgrid_api::{ApiState, ManualClock, RateLimiter, build_router};
use xgrid_cluster::{AgentClient, MasterClient, Registry};
use xgrid_core::document::get_str;
use xgrid_core::security::{NODE_SIGNATURE_HEADER, sign};
use xgrid_core::{ApiEnvelope, NodeConfig, RegisterNodeRequest};
use xgrid_health::HealthMonitor;
use xgrid_state::{
    CentralInbound, ClientRecord, GroupMembership, NodeGroup, NodeStatus, StateStore, Subscription,
};

const REG: &str = "R";
const ALICE_EMAIL: &str = "alice@example.com";

#[derive(Default)]
struct CountingSupervisor {
    restarts: AtomicUsize,
}

impl Supervisor for CountingSupervisor {
    fn restart(&self) -> SupervisorFuture<'_> {
        Box::pin(async move {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn ensure_installed(&self) -> SupervisorFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

fn controller(store: StateStore) -> Router {
    let registry = Registry::new(store, REG);
    let agents = AgentClient::new(Duration::from_secs(5)).unwrap();
    let state = ApiState::new(registry, agents);
    let limiter = Arc::new(RateLimiter::new(60, 100, Arc::new(ManualClock::new())));
    build_router(state, limiter)
}

/// Serve `app` on loopback and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A port that was free a moment ago.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Group 1 holds `n1` and a vmess inbound; alice subscribes to it.
fn seed_catalog(store: &StateStore) {
    store
        .put_group(&NodeGroup {
            id: 1,
            name: "premium".into(),
            description: String::new(),
            active: true,
            created_at: 0,
            updated_at: 0,
        })
        .unwrap();
    store
        .put_membership(&GroupMembership {
            group_id: 1,
            node_id: "n1".into(),
            weight: 1,
            active: true,
        })
        .unwrap();
    store
        .put_inbound(&CentralInbound {
            id: 1,
            name: "vm".into(),
            protocol: "vmess".into(),
            port: 443,
            settings: String::new(),
            stream_settings: String::new(),
            sniffing: String::new(),
            client_stats: false,
            active: true,
        })
        .unwrap();
    store
        .put_client(&ClientRecord {
            id: 7,
            email: ALICE_EMAIL.into(),
            uuid: "0f8e1c2a-5d4b-4c3a-9e8f-7a6b5c4d3e2f".into(),
            subscription_ref: String::new(),
            traffic_limit: 0,
            used_traffic: 0,
            expire_at: None,
            active: true,
        })
        .unwrap();
    put_subscription(store, None);
}

fn put_subscription(store: &StateStore, expire_at: Option<u64>) {
    store
        .put_subscription(&Subscription {
            id: 1,
            client_id: 7,
            group_id: 1,
            expire_at,
            traffic_limit: 0,
            used_traffic: 0,
            active: true,
        })
        .unwrap();
}

fn agent_config(master_url: &str, dir: &Path, port: u16) -> AgentConfig {
    let mut config = AgentConfig {
        master_url: master_url.into(),
        node_id: "n1".into(),
        node_name: "Edge".into(),
        registration_secret: REG.into(),
        listen_addr: format!("127.0.0.1:{port}"),
        proxy_config_path: dir.join("xray.json").display().to_string(),
        proxy_log_dir: dir.join("log").display().to_string(),
        telemetry_interval_secs: 3600,
        ..Default::default()
    };
    config.apply_defaults();
    config
}

/// `GET /api/nodes/{id}/config` signed over the path, as an agent would.
async fn fetch_config(url: &str, node_id: &str, secret: &str) -> Option<NodeConfig> {
    let path = format!("/api/nodes/{node_id}/config");
    let resp = reqwest::Client::new()
        .get(format!("{url}{path}"))
        .header(NODE_SIGNATURE_HEADER, sign(path.as_bytes(), secret))
        .send()
        .await
        .unwrap();
    if resp.status() != reqwest::StatusCode::OK {
        return None;
    }
    let envelope: ApiEnvelope<NodeConfig> = resp.json().await.unwrap();
    envelope.data
}

fn has_alice(clients: &[xgrid_core::Document]) -> bool {
    clients.iter().any(|c| get_str(c, "email") == Some(ALICE_EMAIL))
}

#[tokio::test]
async fn registration_and_membership_drive_node_config() {
    let store = StateStore::open_in_memory().unwrap();
    let url = serve(controller(store.clone())).await;
    let master = MasterClient::new(&url, Duration::from_secs(5)).unwrap();

    let req = RegisterNodeRequest {
        id: "n1".into(),
        name: "Edge".into(),
        ip_address: "127.0.0.1".into(),
        listen_addr: ":8080".into(),
        ..Default::default()
    };
    let first = master.register(&req, REG).await.unwrap();
    let second = master.register(&req, REG).await.unwrap();
    assert_eq!(first.secret_key.len(), 64);
    assert_eq!(first.secret_key, second.secret_key);
    assert!(master.register(&req, "wrong").await.is_err());

    let secret = first.secret_key;
    let config = fetch_config(&url, "n1", &secret).await.unwrap();
    assert!(config.clients.is_empty());
    assert!(fetch_config(&url, "n1", "not-the-secret").await.is_none());

    seed_catalog(&store);
    let config = fetch_config(&url, "n1", &secret).await.unwrap();
    assert!(has_alice(&config.clients));
    assert_eq!(config.inbounds.len(), 1);

    put_subscription(&store, Some(1));
    let config = fetch_config(&url, "n1", &secret).await.unwrap();
    assert!(!has_alice(&config.clients));
}

#[tokio::test]
async fn pushed_config_reaches_agent_and_health_follows_it() {
    let store = StateStore::open_in_memory().unwrap();
    let url = serve(controller(store.clone())).await;
    seed_catalog(&store);

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("agent.json");
    let port = free_port().await;
    let supervisor = Arc::new(CountingSupervisor::default());
    let agent = Agent::new(
        config_path.clone(),
        agent_config(&url, dir.path(), port),
        supervisor.clone(),
    )
    .unwrap();
    assert_eq!(agent.phase(), AgentPhase::Unregistered);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    // Registration precedes the listener, so a reachable agent is registered.
    let http = reqwest::Client::new();
    let health_url = format!("http://127.0.0.1:{port}/api/health");
    let mut listening = false;
    for _ in 0..50 {
        if let Ok(resp) = http.get(&health_url).send().await {
            assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
            listening = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(listening, "agent never started listening");

    let node = store.get_node("n1").unwrap().unwrap();
    assert_eq!(AgentConfig::load(&config_path).unwrap().secret_key, node.secret_key);

    let resp = http
        .post(format!("{url}/api/admin/nodes/n1/sync"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(supervisor.restarts.load(Ordering::SeqCst), 1);

    let written = std::fs::read_to_string(dir.path().join("xray.json")).unwrap();
    assert!(written.contains(ALICE_EMAIL));

    let monitor = HealthMonitor::new(store.clone())
        .with_timeout(Duration::from_secs(2))
        .with_stats_port(free_port().await);
    monitor.check_all().await.unwrap();
    assert_eq!(store.get_node("n1").unwrap().unwrap().status, NodeStatus::Degraded);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    monitor.check_all().await.unwrap();
    assert_eq!(store.get_node("n1").unwrap().unwrap().status, NodeStatus::Offline);
}

#[tokio::test]
async fn bulk_sync_reports_unreachable_nodes() {
    let store = StateStore::open_in_memory().unwrap();
    let url = serve(controller(store.clone())).await;
    let master = MasterClient::new(&url, Duration::from_secs(5)).unwrap();

    let req = RegisterNodeRequest {
        id: "n1".into(),
        name: "Edge".into(),
        ip_address: "127.0.0.1".into(),
        listen_addr: format!(":{}", free_port().await),
        ..Default::default()
    };
    master.register(&req, REG).await.unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{url}/api/admin/nodes/sync"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["synced"], 0);
    assert_eq!(body["data"]["failed"], 1);
    assert!(body["data"]["last_error"].as_str().unwrap().starts_with("n1"));
}
