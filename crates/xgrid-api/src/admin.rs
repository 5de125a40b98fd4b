//! Operator endpoints under `/api/admin`.

use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};
use xgrid_cluster::ClientResult;
use xgrid_distribution::ResolvedInbound;
use xgrid_state::{
    CentralInbound, ClientRecord, GroupMembership, NodeGroup, NodeRecord, StateError, Subscription,
};

use crate::ApiState;
use crate::response::{error_response, ok, status_for};

/// Header carrying the operator token.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Requires `X-Admin-Token` to match when a token is configured.
pub async fn require_admin(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if let Some(expected) = state.admin_token.as_deref() {
        let presented = req
            .headers()
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            warn!(path = %req.uri().path(), "admin request rejected");
            return error_response("unauthorized", StatusCode::UNAUTHORIZED);
        }
    }
    next.run(req).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn storage_error(e: StateError) -> Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

// ── Fleet ──────────────────────────────────────────────────────────

/// GET /api/admin/dashboard
pub async fn dashboard(State(state): State<ApiState>) -> Response {
    match state.registry.dashboard() {
        Ok(metrics) => ok(metrics).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(e.kind())),
    }
}

/// GET /api/admin/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> Response {
    match state.registry.list_nodes() {
        Ok(nodes) => ok(nodes).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(e.kind())),
    }
}

/// DELETE /api/admin/nodes/{id}
pub async fn delete_node(State(state): State<ApiState>, Path(node_id): Path<String>) -> Response {
    match state.registry.delete_node(&node_id) {
        Ok(()) => ok("deleted").into_response(),
        Err(e) => error_response(&e.to_string(), status_for(e.kind())),
    }
}

/// Load a node for an operator action, or the error response to return.
fn node_for_action(state: &ApiState, node_id: &str) -> Result<NodeRecord, Response> {
    match state.registry.store().get_node(node_id) {
        Ok(Some(node)) => Ok(node),
        Ok(None) => Err(error_response("node not found", StatusCode::NOT_FOUND)),
        Err(e) => Err(storage_error(e)),
    }
}

fn push_result(node_id: &str, action: &str, result: ClientResult<()>) -> Response {
    match result {
        Ok(()) => {
            info!(%node_id, action, "node action delivered");
            ok(action).into_response()
        }
        Err(e) => {
            warn!(%node_id, action, error = %e, "node action failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/admin/nodes/{id}/sync
pub async fn sync_node(State(state): State<ApiState>, Path(node_id): Path<String>) -> Response {
    let node = match node_for_action(&state, &node_id) {
        Ok(node) => node,
        Err(resp) => return resp,
    };
    let result = state.agents.sync_node(state.registry.config_service(), &node).await;
    push_result(&node_id, "synced", result)
}

/// POST /api/admin/nodes/{id}/restart
pub async fn restart_node(State(state): State<ApiState>, Path(node_id): Path<String>) -> Response {
    let node = match node_for_action(&state, &node_id) {
        Ok(node) => node,
        Err(resp) => return resp,
    };
    let result = state.agents.restart(&node).await;
    push_result(&node_id, "restarting", result)
}

/// POST /api/admin/nodes/{id}/update
pub async fn update_node(State(state): State<ApiState>, Path(node_id): Path<String>) -> Response {
    let node = match node_for_action(&state, &node_id) {
        Ok(node) => node,
        Err(resp) => return resp,
    };
    let result = state.agents.update(&node).await;
    push_result(&node_id, "updating", result)
}

/// POST /api/admin/nodes/sync
pub async fn sync_all(State(state): State<ApiState>) -> Response {
    match state
        .agents
        .sync_all(state.registry.store(), state.registry.config_service())
        .await
    {
        Ok(report) => {
            info!(synced = report.synced, failed = report.failed, "bulk sync finished");
            ok(report).into_response()
        }
        Err(e) => storage_error(e),
    }
}

// ── Catalog upserts ────────────────────────────────────────────────

/// PUT /api/admin/groups
pub async fn put_group(State(state): State<ApiState>, Json(group): Json<NodeGroup>) -> Response {
    match state.registry.store().put_group(&group) {
        Ok(()) => ok(group).into_response(),
        Err(e) => storage_error(e),
    }
}

/// PUT /api/admin/memberships
pub async fn put_membership(
    State(state): State<ApiState>,
    Json(membership): Json<GroupMembership>,
) -> Response {
    let store = state.registry.store();
    match (store.get_group(membership.group_id), store.get_node(&membership.node_id)) {
        (Ok(Some(_)), Ok(Some(_))) => {}
        (Ok(None), _) => return error_response("group not found", StatusCode::NOT_FOUND),
        (_, Ok(None)) => return error_response("node not found", StatusCode::NOT_FOUND),
        (Err(e), _) | (_, Err(e)) => return storage_error(e),
    }
    match store.put_membership(&membership) {
        Ok(()) => ok(membership).into_response(),
        Err(e) => storage_error(e),
    }
}

/// PUT /api/admin/inbounds
///
/// Settings blobs must parse; a stored malformed inbound would fail every
/// node config and bundle.
pub async fn put_inbound(State(state): State<ApiState>, Json(inbound): Json<CentralInbound>) -> Response {
    if let Err(e) = ResolvedInbound::resolve(&inbound) {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST);
    }
    match state.registry.store().put_inbound(&inbound) {
        Ok(()) => ok(inbound).into_response(),
        Err(e) => storage_error(e),
    }
}

/// PUT /api/admin/clients
pub async fn put_client(State(state): State<ApiState>, Json(client): Json<ClientRecord>) -> Response {
    if client.uuid.trim().is_empty() {
        return error_response("client uuid required", StatusCode::BAD_REQUEST);
    }
    let store = state.registry.store();
    match store.find_client_by_uuid(&client.uuid) {
        Ok(Some(holder)) if holder.id != client.id => {
            return error_response("client uuid already in use", StatusCode::BAD_REQUEST);
        }
        Ok(_) => {}
        Err(e) => return storage_error(e),
    }
    match store.put_client(&client) {
        Ok(()) => ok(client).into_response(),
        Err(e) => storage_error(e),
    }
}

/// PUT /api/admin/subscriptions
pub async fn put_subscription(State(state): State<ApiState>, Json(sub): Json<Subscription>) -> Response {
    match state.registry.store().put_subscription(&sub) {
        Ok(()) => ok(sub).into_response(),
        Err(e) => storage_error(e),
    }
}
