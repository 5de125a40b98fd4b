//! Master mode: the fleet controller.
//!
//! Opens the state store, assembles the API router and runs the health
//! monitor next to it until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tracing::{info, warn};
use xgrid_api::{ApiState, RateLimiter, SystemClock, build_router};
use xgrid_cluster::{AgentClient, Registry};
use xgrid_health::HealthMonitor;
use xgrid_state::StateStore;

use crate::config::MasterConfig;

/// Timeout for pushes to agents.
const AGENT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Time in-flight requests get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run_master(config: MasterConfig) -> anyhow::Result<()> {
    info!("xgrid controller starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = Registry::new(store.clone(), config.security.registration_secret.clone());
    let agents = AgentClient::new(AGENT_PUSH_TIMEOUT)?;
    let state = ApiState::new(registry, agents).with_admin_token(config.security.admin_token.clone());
    if state.admin_token.is_none() {
        info!("admin token not configured, admin endpoints are open");
    }

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.per_minute,
        config.rate_limit.burst,
        Arc::new(SystemClock),
    ));

    let monitor = HealthMonitor::new(store)
        .with_interval(config.health.interval())
        .with_timeout(config.health.timeout())
        .with_stats_port(config.health.stats_port);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // ── Start background tasks ─────────────────────────────────

    let monitor_shutdown = shutdown_rx.clone();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = build_router(state, limiter);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    let result = serve_until(listener, router, shutdown_rx, SHUTDOWN_GRACE).await;
    let _ = monitor_handle.await;

    info!("xgrid controller stopped");
    result
}

/// Serve until `shutdown` fires, then give in-flight requests `grace` to
/// finish before the server task is aborted.
async fn serve_until(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> anyhow::Result<()> {
    let signal = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(stopped(signal))
            .await
    });

    tokio::select! {
        joined = &mut server => return Ok(joined??),
        _ = stopped(shutdown) => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => Ok(joined??),
        Err(_) => {
            warn!(?grace, "graceful shutdown timed out, dropping in-flight requests");
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
