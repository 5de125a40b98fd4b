//! Signed RPC endpoints served to the controller.
//!
//! | Method | Path | Signed over | Response |
//! |---|---|---|---|
//! | GET | `/api/health` | path | `{status:"ok", timestamp}` |
//! | POST | `/api/sync` | body | `{status:"accepted"}` |
//! | POST | `/api/restart` | path | `{status:"restarting"}` |
//! | POST | `/api/update` | body | `{status:"updating"}` |
//!
//! Every request carries `X-Master-Signature` computed with this node's
//! operational secret. Until registration has produced a secret, every
//! request is refused.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{error, info, warn};
use xgrid_core::security::{MASTER_SIGNATURE_HEADER, verify};
use xgrid_core::{ApiEnvelope, SyncAction, SyncRequest, epoch_secs};

use crate::error::AgentError;
use crate::runtime::ProxyRuntime;

/// The operational secret, shared between the server and the schedulers.
#[derive(Clone, Default)]
pub struct SharedSecret(Arc<RwLock<String>>);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(secret.into())))
    }

    pub fn get(&self) -> Option<String> {
        let secret = self.0.read();
        (!secret.is_empty()).then(|| secret.clone())
    }

    pub fn set(&self, secret: impl Into<String>) {
        *self.0.write() = secret.into();
    }
}

#[derive(Clone)]
pub struct AgentState {
    pub secret: SharedSecret,
    pub runtime: Arc<ProxyRuntime>,
}

pub fn build_router(state: AgentState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sync", post(sync))
        .route("/api/restart", post(restart))
        .route("/api/update", post(update))
        .with_state(state)
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, Json(ApiEnvelope::<()>::err(msg))).into_response()
}

fn agent_error(err: AgentError) -> Response {
    match err {
        AgentError::NotConfigured => error_response(&err.to_string(), StatusCode::BAD_REQUEST),
        other => {
            error!(error = %other, "request failed");
            error_response(&other.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Check `X-Master-Signature` over `payload`.
fn authorize(state: &AgentState, headers: &HeaderMap, payload: &[u8]) -> Result<(), Response> {
    let Some(secret) = state.secret.get() else {
        warn!("request refused, no shared secret yet");
        return Err(error_response("missing shared secret", StatusCode::UNAUTHORIZED));
    };
    let Some(signature) = headers
        .get(MASTER_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    else {
        warn!("request without signature");
        return Err(error_response("missing signature", StatusCode::UNAUTHORIZED));
    };
    if !verify(payload, &secret, signature) {
        warn!("request with invalid signature");
        return Err(error_response("invalid signature", StatusCode::UNAUTHORIZED));
    }
    Ok(())
}

/// GET /api/health
async fn health(State(state): State<AgentState>, OriginalUri(uri): OriginalUri, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers, uri.path().as_bytes()) {
        return resp;
    }
    Json(json!({"status": "ok", "timestamp": epoch_secs()})).into_response()
}

/// POST /api/sync
async fn sync(State(state): State<AgentState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(resp) = authorize(&state, &headers, &body) {
        return resp;
    }
    info!(bytes = body.len(), "sync request received");

    let Ok(req) = serde_json::from_slice::<SyncRequest>(&body) else {
        return error_response("invalid payload", StatusCode::BAD_REQUEST);
    };
    let result = match SyncAction::parse(&req.action) {
        Some(SyncAction::ApplyConfig) => state.runtime.apply_config(&req.config).await,
        Some(SyncAction::UpdateClients) => state.runtime.update_clients(&req.config.clients).await,
        None => return error_response("unknown action", StatusCode::BAD_REQUEST),
    };
    match result {
        Ok(()) => Json(json!({"status": "accepted"})).into_response(),
        Err(e) => agent_error(e),
    }
}

/// POST /api/restart
async fn restart(State(state): State<AgentState>, OriginalUri(uri): OriginalUri, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers, uri.path().as_bytes()) {
        return resp;
    }
    info!("restart requested");
    match state.runtime.supervisor().restart().await {
        Ok(()) => Json(json!({"status": "restarting"})).into_response(),
        Err(e) => agent_error(e),
    }
}

/// POST /api/update
async fn update(State(state): State<AgentState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(resp) = authorize(&state, &headers, &body) {
        return resp;
    }
    info!("update requested");
    match state.runtime.supervisor().ensure_installed().await {
        Ok(()) => Json(json!({"status": "updating"})).into_response(),
        Err(e) => agent_error(e),
    }
}
