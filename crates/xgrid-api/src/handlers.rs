//! Node RPC and subscription handlers.
//!
//! Node endpoints read the raw body (or the request path for GETs) so the
//! exact signed bytes reach the registry.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};
use xgrid_cluster::RegistryError;
use xgrid_core::epoch_secs;
use xgrid_core::security::NODE_SIGNATURE_HEADER;
use xgrid_subscription::{Format, SubscriptionError};

use crate::ApiState;
use crate::response::{error_response, ok, status_for};

fn node_signature(headers: &HeaderMap) -> Option<&str> {
    headers.get(NODE_SIGNATURE_HEADER).and_then(|v| v.to_str().ok())
}

fn registry_error(err: RegistryError) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        error!(error = %err, "node request failed");
    }
    error_response(&err.to_string(), status)
}

// ── Health ─────────────────────────────────────────────────────────

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "timestamp": epoch_secs()}))
}

// ── Nodes ──────────────────────────────────────────────────────────

/// POST /api/nodes/register
pub async fn register_node(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    match state.registry.register_node(&body, node_signature(&headers)) {
        Ok(resp) => ok(resp).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/nodes/{id}/config
pub async fn node_config(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    match state
        .registry
        .node_config(&node_id, uri.path(), node_signature(&headers))
    {
        Ok(config) => ok(config).into_response(),
        Err(e) => registry_error(e),
    }
}

/// POST /api/nodes/{id}/stats
pub async fn node_stats(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state
        .registry
        .receive_stats(&node_id, &body, node_signature(&headers))
    {
        Ok(()) => ok("accepted").into_response(),
        Err(e) => registry_error(e),
    }
}

// ── Subscriptions ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubscriptionQuery {
    pub format: Option<String>,
}

/// GET /api/subscriptions/{client_uuid}?format=
pub async fn subscription(
    State(state): State<ApiState>,
    Path(client_uuid): Path<String>,
    Query(query): Query<SubscriptionQuery>,
) -> Response {
    if client_uuid.trim().is_empty() {
        return error_response("client uuid required", StatusCode::BAD_REQUEST);
    }
    let format = match Format::parse(query.format.as_deref()) {
        Ok(f) => f,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    match state.subscriptions.generate_bundle(&client_uuid) {
        Ok(bundle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, format.content_type())],
            bundle.render(format).to_string(),
        )
            .into_response(),
        Err(e) => subscription_error(&client_uuid, e),
    }
}

fn subscription_error(client_uuid: &str, err: SubscriptionError) -> Response {
    if err.is_client_error() {
        warn!(%client_uuid, error = %err, "subscription refused");
        error_response(&err.to_string(), StatusCode::BAD_REQUEST)
    } else {
        error!(%client_uuid, error = %err, "subscription failed");
        error_response(&err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
    }
}
