//! xgrid-agent: the node-side half of the control plane.
//!
//! # Architecture
//!
//! ```text
//!   controller                          agent
//!   ──────────                          ─────
//!   /api/nodes/register  ◄── register ── Agent (unregistered → registering → active)
//!   /api/nodes/{id}/stats ◄── telemetry tick (60s)
//!                                        maintenance tick (24h) ── Installer
//!   AgentClient ── signed RPC ──►  server: /api/health /api/sync /api/restart /api/update
//!                                        │
//!                                        ▼
//!                                  ProxyRuntime ── write file ──► Supervisor::restart
//! ```
//!
//! Registration happens once, when no operational secret is persisted. Any
//! failure is fatal; the operator re-runs the agent.

pub mod config;
pub mod error;
pub mod host;
pub mod installer;
pub mod runtime;
pub mod server;
pub mod supervisor;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};
use xgrid_cluster::MasterClient;
use xgrid_core::RegisterNodeRequest;

pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use runtime::{ProxyPaths, ProxyRuntime};
pub use server::{AgentState, SharedSecret, build_router};
pub use supervisor::{Supervisor, SupervisorFuture, SystemdSupervisor};

const MASTER_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Registration state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Unregistered,
    Registering,
    Active,
}

pub struct Agent {
    config_path: PathBuf,
    config: AgentConfig,
    phase: AgentPhase,
    secret: SharedSecret,
    runtime: Arc<ProxyRuntime>,
    master: MasterClient,
}

impl Agent {
    pub fn new(config_path: PathBuf, config: AgentConfig, supervisor: Arc<dyn Supervisor>) -> AgentResult<Self> {
        let master = MasterClient::new(&config.master_url, MASTER_TIMEOUT)?;
        let runtime = Arc::new(ProxyRuntime::new(ProxyPaths::from_config(&config), supervisor));
        let secret = SharedSecret::new(config.secret_key.clone());
        let phase = if secret.get().is_some() {
            AgentPhase::Active
        } else {
            AgentPhase::Unregistered
        };
        Ok(Self {
            config_path,
            config,
            phase,
            secret,
            runtime,
            master,
        })
    }

    /// An agent supervising the proxy through systemd.
    pub fn with_systemd(config_path: PathBuf, config: AgentConfig) -> AgentResult<Self> {
        let installer = installer::Installer::from_config(&config)?;
        let supervisor = Arc::new(SystemdSupervisor::new(config.service_name.clone(), installer));
        Self::new(config_path, config, supervisor)
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn router(&self) -> axum::Router {
        build_router(AgentState {
            secret: self.secret.clone(),
            runtime: self.runtime.clone(),
        })
    }

    /// Register with the controller unless a secret is already persisted.
    ///
    /// On success the secret is stored and the config file rewritten; a
    /// failure to rewrite the file is only logged.
    pub async fn ensure_registered(&mut self) -> AgentResult<()> {
        if self.phase == AgentPhase::Active {
            debug!(node_id = %self.config.node_id, "secret already persisted, skipping registration");
            return Ok(());
        }

        self.phase = AgentPhase::Registering;
        let req = RegisterNodeRequest {
            id: self.config.node_id.clone(),
            name: self.config.node_name.clone(),
            master_url: self.config.master_url.clone(),
            ip_address: host::detect_primary_ip(),
            hostname: host::detect_hostname(),
            location: String::new(),
            xray_version: self.config.xray_version.clone(),
            listen_addr: self.config.listen_addr.clone(),
        };
        let resp = match self.master.register(&req, &self.config.registration_secret).await {
            Ok(resp) => resp,
            Err(e) => {
                self.phase = AgentPhase::Unregistered;
                return Err(e.into());
            }
        };

        self.secret.set(resp.secret_key.clone());
        self.config.secret_key = resp.secret_key;
        if let Err(e) = self.config.save(&self.config_path) {
            warn!(path = %self.config_path.display(), error = %e, "failed to persist secret key");
        }
        self.phase = AgentPhase::Active;
        info!(node_id = %resp.node_id, "node registered");
        Ok(())
    }

    /// Register, start both schedulers and serve until `shutdown` fires.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        info!(
            node_id = %self.config.node_id,
            master = %self.config.master_url,
            listen = %self.config.listen_addr,
            "starting node agent"
        );
        self.ensure_registered().await?;

        let telemetry = tokio::spawn(run_telemetry(
            self.master.clone(),
            self.config.node_id.clone(),
            self.secret.clone(),
            self.runtime.clone(),
            self.config.telemetry_interval(),
            shutdown.clone(),
        ));
        let maintenance = tokio::spawn(run_maintenance(
            self.runtime.clone(),
            self.config.maintenance_interval(),
            shutdown.clone(),
        ));

        let addr = self.config.listen_socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "agent API server listening");
        let result = serve_until(listener, self.router(), shutdown).await;

        let _ = telemetry.await;
        let _ = maintenance.await;
        info!("agent stopped");
        result
    }
}

/// Serve `router` until `shutdown` fires, then allow in-flight requests
/// [`SHUTDOWN_GRACE`] to finish.
pub async fn serve_until(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    shutdown: watch::Receiver<bool>,
) -> AgentResult<()> {
    let signal = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(stopped(signal))
            .await
    });

    tokio::select! {
        joined = &mut server => return Ok(joined??),
        _ = stopped(shutdown) => {}
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(joined) => Ok(joined??),
        Err(_) => {
            warn!(grace = ?SHUTDOWN_GRACE, "graceful shutdown timed out");
            server.abort();
            Ok(())
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Post a signed heartbeat every `period`. Ticks are skipped until a secret
/// has been negotiated.
async fn run_telemetry(
    master: MasterClient,
    node_id: String,
    secret: SharedSecret,
    runtime: Arc<ProxyRuntime>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(secret) = secret.get() else {
                    debug!("skipping heartbeat, secret not negotiated yet");
                    continue;
                };
                let report = telemetry::collect(&runtime).await;
                match master.post_stats(&node_id, &secret, &report).await {
                    Ok(()) => debug!(cpu = report.cpu_usage, memory = report.memory_usage, "heartbeat sent"),
                    Err(e) => warn!(error = %e, "heartbeat failed"),
                }
            }
            _ = shutdown.changed() => {
                debug!("telemetry loop shutting down");
                break;
            }
        }
    }
}

/// Ensure the proxy binary is installed every `period`.
async fn run_maintenance(runtime: Arc<ProxyRuntime>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = runtime.supervisor().ensure_installed().await {
                    warn!(error = %e, "proxy install check failed");
                }
            }
            _ = shutdown.changed() => {
                debug!("maintenance loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use xgrid_core::NodeStatsReport;
    use xgrid_core::security::{MASTER_SIGNATURE_HEADER, NODE_SIGNATURE_HEADER, sign, verify};

    const REG: &str = "reg";
    const ISSUED: &str = "issued-secret";

    struct NoopSupervisor;

    impl Supervisor for NoopSupervisor {
        fn restart(&self) -> SupervisorFuture<'_> {
            Box::pin(async { Ok(()) })
        }

        fn ensure_installed(&self) -> SupervisorFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Controller stub: registration plus a heartbeat counter.
    async fn serve_controller(heartbeats: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/api/nodes/register",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let sig = headers
                        .get(NODE_SIGNATURE_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if !verify(&body, REG, sig) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"success": false})));
                    }
                    let req: Value = serde_json::from_slice(&body).unwrap();
                    (
                        StatusCode::OK,
                        Json(json!({"success": true, "data": {
                            "node_id": req["id"], "secret_key": ISSUED, "status": "online"
                        }})),
                    )
                }),
            )
            .route(
                "/api/nodes/n1/stats",
                post(move |headers: HeaderMap, body: Bytes| {
                    let heartbeats = heartbeats.clone();
                    async move {
                        let sig = headers
                            .get(NODE_SIGNATURE_HEADER)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        let report: NodeStatsReport = serde_json::from_slice(&body).unwrap();
                        if verify(&body, ISSUED, sig) && report.status == "online" {
                            heartbeats.fetch_add(1, Ordering::SeqCst);
                        }
                        StatusCode::OK
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(master_url: &str, dir: &std::path::Path, registration_secret: &str) -> AgentConfig {
        let mut cfg = AgentConfig {
            master_url: master_url.into(),
            node_id: "n1".into(),
            node_name: "Edge".into(),
            registration_secret: registration_secret.into(),
            listen_addr: "127.0.0.1:0".into(),
            proxy_config_path: dir.join("proxy/config.json").display().to_string(),
            proxy_log_dir: dir.join("log").display().to_string(),
            ..Default::default()
        };
        cfg.apply_defaults();
        cfg
    }

    #[tokio::test]
    async fn registration_persists_secret() {
        let url = serve_controller(Arc::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        let cfg = config(&url, dir.path(), REG);
        cfg.save(&path).unwrap();

        let mut agent = Agent::new(path.clone(), cfg, Arc::new(NoopSupervisor)).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Unregistered);
        agent.ensure_registered().await.unwrap();

        assert_eq!(agent.phase(), AgentPhase::Active);
        assert_eq!(agent.config().secret_key, ISSUED);
        assert_eq!(AgentConfig::load(&path).unwrap().secret_key, ISSUED);
    }

    #[tokio::test]
    async fn registration_failure_is_fatal() {
        let url = serve_controller(Arc::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&url, dir.path(), "wrong");

        let mut agent = Agent::new(dir.path().join("agent.json"), cfg, Arc::new(NoopSupervisor)).unwrap();
        let err = agent.ensure_registered().await.unwrap_err();
        assert!(matches!(err, AgentError::Registration(_)));
        assert_eq!(agent.phase(), AgentPhase::Unregistered);
    }

    #[tokio::test]
    async fn persisted_secret_skips_registration() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config("http://127.0.0.1:1", dir.path(), REG);
        cfg.secret_key = "kept".into();

        let mut agent = Agent::new(dir.path().join("agent.json"), cfg, Arc::new(NoopSupervisor)).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Active);
        agent.ensure_registered().await.unwrap();
        assert_eq!(agent.config().secret_key, "kept");
    }

    #[tokio::test]
    async fn telemetry_posts_signed_heartbeats_until_shutdown() {
        let heartbeats = Arc::new(AtomicUsize::new(0));
        let url = serve_controller(heartbeats.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&url, dir.path(), REG);
        let runtime = Arc::new(ProxyRuntime::new(ProxyPaths::from_config(&cfg), Arc::new(NoopSupervisor)));
        let master = MasterClient::new(&url, Duration::from_secs(5)).unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_telemetry(
            master,
            "n1".into(),
            SharedSecret::new(ISSUED),
            runtime,
            Duration::from_millis(50),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(800)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(heartbeats.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn telemetry_skips_without_secret() {
        let heartbeats = Arc::new(AtomicUsize::new(0));
        let url = serve_controller(heartbeats.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&url, dir.path(), REG);
        let runtime = Arc::new(ProxyRuntime::new(ProxyPaths::from_config(&cfg), Arc::new(NoopSupervisor)));
        let master = MasterClient::new(&url, Duration::from_secs(5)).unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_telemetry(
            master,
            "n1".into(),
            SharedSecret::default(),
            runtime,
            Duration::from_millis(20),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(heartbeats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_serves_signed_api_and_stops() {
        let url = serve_controller(Arc::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");

        // Reserve a port for the agent's listener.
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = spare.local_addr().unwrap().port();
        drop(spare);

        let mut cfg = config(&url, dir.path(), REG);
        cfg.listen_addr = format!("127.0.0.1:{port}");
        let agent = Agent::new(path, cfg, Arc::new(NoopSupervisor)).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(agent.run(rx));

        let client = reqwest::Client::new();
        let health = format!("http://127.0.0.1:{port}/api/health");
        let mut status = None;
        for _ in 0..50 {
            if let Ok(resp) = client
                .get(&health)
                .header(MASTER_SIGNATURE_HEADER, sign(b"/api/health", ISSUED))
                .send()
                .await
            {
                status = Some(resp.status());
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, Some(reqwest::StatusCode::OK));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
