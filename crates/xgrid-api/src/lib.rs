//! xgrid-api: controller HTTP API.
//!
//! Node RPC (registration, config pull, telemetry), the public subscription
//! endpoint and the operator surface, as axum routers over the shared
//! [`ApiState`].
//!
//! # API Routes
//!
//! | Method | Path | Auth | Description |
//! |---|---|---|---|
//! | GET | `/api/health` | none | Liveness |
//! | POST | `/api/nodes/register` | registration secret | Register or re-register a node |
//! | GET | `/api/nodes/{id}/config` | node secret (path) | Computed node configuration |
//! | POST | `/api/nodes/{id}/stats` | node secret (body) | Telemetry heartbeat |
//! | GET | `/api/subscriptions/{uuid}?format=` | rate limited | Subscription bundle |
//! | GET | `/api/admin/dashboard` | admin token | Fleet metrics |
//! | GET | `/api/admin/nodes` | admin token | Nodes with their groups |
//! | DELETE | `/api/admin/nodes/{id}` | admin token | Remove a node |
//! | POST | `/api/admin/nodes/{id}/sync` | admin token | Push config to one node |
//! | POST | `/api/admin/nodes/{id}/restart` | admin token | Restart a node's proxy |
//! | POST | `/api/admin/nodes/{id}/update` | admin token | Reinstall or upgrade a node's proxy |
//! | POST | `/api/admin/nodes/sync` | admin token | Push config to every node |
//! | PUT | `/api/admin/{groups,memberships,inbounds,clients,subscriptions}` | admin token | Catalog upserts |

pub mod admin;
pub mod handlers;
pub mod rate_limit;
mod response;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use xgrid_cluster::{AgentClient, Registry};
use xgrid_subscription::SubscriptionService;

pub use rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Registry,
    pub subscriptions: SubscriptionService,
    pub agents: AgentClient,
    /// Operator token; the admin surface is open when unset.
    pub admin_token: Option<String>,
}

impl ApiState {
    pub fn new(registry: Registry, agents: AgentClient) -> Self {
        let subscriptions = SubscriptionService::new(registry.store().clone());
        Self {
            registry,
            subscriptions,
            agents,
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }
}

/// Build the complete controller router.
pub fn build_router(state: ApiState, limiter: Arc<RateLimiter>) -> Router {
    let node_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/nodes/register", post(handlers::register_node))
        .route("/nodes/{id}/config", get(handlers::node_config))
        .route("/nodes/{id}/stats", post(handlers::node_stats));

    let subscription_routes = Router::new()
        .route("/subscriptions/{client_uuid}", get(handlers::subscription))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit::rate_limit));

    let admin_routes = Router::new()
        .route("/dashboard", get(admin::dashboard))
        .route("/nodes", get(admin::list_nodes))
        .route("/nodes/sync", post(admin::sync_all))
        .route("/nodes/{id}", delete(admin::delete_node))
        .route("/nodes/{id}/sync", post(admin::sync_node))
        .route("/nodes/{id}/restart", post(admin::restart_node))
        .route("/nodes/{id}/update", post(admin::update_node))
        .route("/groups", put(admin::put_group))
        .route("/memberships", put(admin::put_membership))
        .route("/inbounds", put(admin::put_inbound))
        .route("/clients", put(admin::put_client))
        .route("/subscriptions", put(admin::put_subscription))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin::require_admin));

    let api_routes = node_routes
        .merge(subscription_routes)
        .nest("/admin", admin_routes)
        .with_state(state);

    Router::new().nest("/api", api_routes)
}
