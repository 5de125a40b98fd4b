//! SubscriptionService: resolves a client into a rendered bundle.

use tracing::debug;
use xgrid_core::epoch_secs;
use xgrid_distribution::{ConfigService, ResolvedInbound};
use xgrid_state::{ClientRecord, NodeStatus, StateStore, Subscription, is_expired};

use crate::endpoint::{Endpoint, dedupe_and_sort};
use crate::error::{SubscriptionError, SubscriptionResult};
use crate::format::Format;
use crate::render;

/// Every representation of one client's endpoint list.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub json: String,
    pub clash: String,
    pub v2ray: String,
    pub shadowrocket: String,
    /// Ordered endpoints the renderings were built from.
    pub endpoints: Vec<Endpoint>,
    pub generated_at: u64,
}

impl Bundle {
    /// The rendering served for `format`.
    pub fn render(&self, format: Format) -> &str {
        match format {
            Format::Json => &self.json,
            Format::Clash => &self.clash,
            Format::V2ray => &self.v2ray,
            Format::Shadowrocket => &self.shadowrocket,
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: StateStore,
    config: ConfigService,
}

impl SubscriptionService {
    pub fn new(store: StateStore) -> Self {
        let config = ConfigService::new(store.clone());
        Self { store, config }
    }

    /// Bundle for the client with `uuid`, evaluated against the current time.
    pub fn generate_bundle(&self, uuid: &str) -> SubscriptionResult<Bundle> {
        self.generate_bundle_at(uuid, epoch_secs())
    }

    pub fn generate_bundle_at(&self, uuid: &str, now: u64) -> SubscriptionResult<Bundle> {
        let client = self.resolve_client(uuid, now)?;

        let subscriptions: Vec<Subscription> = self
            .store
            .list_subscriptions_for_client(client.id)?
            .into_iter()
            .filter(|sub| sub.is_usable(now))
            .collect();
        if subscriptions.is_empty() {
            return Err(SubscriptionError::NoActiveSubscriptions(uuid.to_string()));
        }

        let inbounds = self.config.active_inbounds()?;
        let mut endpoints = Vec::new();
        for sub in &subscriptions {
            endpoints.extend(self.group_endpoints(sub.group_id, &inbounds)?);
        }
        let endpoints = dedupe_and_sort(endpoints);
        debug!(
            client_id = client.id,
            subscriptions = subscriptions.len(),
            endpoints = endpoints.len(),
            "subscription bundle built"
        );

        let links = render::render_links(&client.uuid, &endpoints);
        Ok(Bundle {
            json: render::render_json(&client, &endpoints)?,
            clash: render::render_clash(&client, &endpoints)?,
            v2ray: links.clone(),
            shadowrocket: links,
            endpoints,
            generated_at: now,
        })
    }

    fn resolve_client(&self, uuid: &str, now: u64) -> SubscriptionResult<ClientRecord> {
        let client = self
            .store
            .find_client_by_uuid(uuid)?
            .ok_or_else(|| SubscriptionError::ClientNotFound(uuid.to_string()))?;
        if !client.active {
            return Err(SubscriptionError::ClientInactive(uuid.to_string()));
        }
        if is_expired(client.expire_at, now) {
            return Err(SubscriptionError::ClientExpired(uuid.to_string()));
        }
        Ok(client)
    }

    /// One endpoint per (reachable member node, inbound) of an active group.
    fn group_endpoints(
        &self,
        group_id: u64,
        inbounds: &[ResolvedInbound],
    ) -> SubscriptionResult<Vec<Endpoint>> {
        match self.store.get_group(group_id)? {
            Some(group) if group.active => {}
            _ => return Ok(Vec::new()),
        }

        let mut endpoints = Vec::new();
        for membership in self.store.list_memberships_for_group(group_id)? {
            if !membership.active {
                continue;
            }
            let Some(node) = self.store.get_node(&membership.node_id)? else {
                continue;
            };
            if node.status == NodeStatus::Offline {
                continue;
            }
            endpoints.extend(
                inbounds
                    .iter()
                    .map(|inbound| Endpoint::new(&node, inbound, membership.weight)),
            );
        }
        Ok(endpoints)
    }
}
