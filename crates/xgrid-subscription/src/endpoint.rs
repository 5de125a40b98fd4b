//! Endpoints: concrete (node, inbound) pairings.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use xgrid_core::document::{Document, deep_clone};
use xgrid_distribution::ResolvedInbound;
use xgrid_state::NodeRecord;

/// One connectable endpoint offered to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    #[serde(skip)]
    pub node_id: String,
    #[serde(skip)]
    pub inbound_id: u64,
    /// `<inbound tag>-<node name>`. Not unique: node names are free-form.
    pub name: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Membership weight of the node in the granting group.
    pub weight: i64,
    pub settings: Document,
    pub stream_settings: Option<Document>,
}

impl Endpoint {
    pub fn new(node: &NodeRecord, inbound: &ResolvedInbound, weight: i64) -> Self {
        Self {
            node_id: node.id.clone(),
            inbound_id: inbound.id,
            name: format!("{}-{}", inbound.tag, node.name),
            protocol: inbound.protocol.clone(),
            host: node.public_host().to_string(),
            port: inbound.port,
            weight,
            settings: deep_clone(&inbound.settings),
            stream_settings: inbound.stream_settings.as_ref().map(deep_clone),
        }
    }

    /// Stream settings, or an empty document when the inbound has none.
    pub fn stream(&self) -> Document {
        self.stream_settings.clone().unwrap_or_default()
    }
}

/// Weight descending, then name ascending.
fn display_order(a: &Endpoint, b: &Endpoint) -> Ordering {
    b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name))
}

/// Sort endpoints into display order.
pub fn sort_endpoints(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(display_order);
}

/// Collapse endpoints for the same (node, inbound) pair, keeping the highest
/// weight, then sort.
///
/// A node reachable through two groups yields the same endpoint twice; only
/// one copy is offered.
pub fn dedupe_and_sort(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut by_pair: BTreeMap<(String, u64), Endpoint> = BTreeMap::new();
    for endpoint in endpoints {
        let key = (endpoint.node_id.clone(), endpoint.inbound_id);
        match by_pair.get(&key) {
            Some(existing) if existing.weight >= endpoint.weight => {}
            _ => {
                by_pair.insert(key, endpoint);
            }
        }
    }
    let mut out: Vec<Endpoint> = by_pair.into_values().collect();
    sort_endpoints(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(name: &str, weight: i64) -> Endpoint {
        on_node(name, name, weight)
    }

    fn on_node(node_id: &str, name: &str, weight: i64) -> Endpoint {
        Endpoint {
            node_id: node_id.into(),
            inbound_id: 1,
            name: name.into(),
            protocol: "vless".into(),
            host: "h".into(),
            port: 443,
            weight,
            settings: Document::new(),
            stream_settings: None,
        }
    }

    fn names(eps: &[Endpoint]) -> Vec<&str> {
        eps.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn weight_descending_then_name() {
        let mut eps = vec![ep("b", 3), ep("a", 1), ep("c", 3), ep("d", 2)];
        sort_endpoints(&mut eps);
        assert_eq!(names(&eps), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn order_is_independent_of_input_order() {
        let mut forward = vec![ep("x", 1), ep("y", 1), ep("z", 5)];
        let mut reverse: Vec<Endpoint> = forward.iter().rev().cloned().collect();
        sort_endpoints(&mut forward);
        sort_endpoints(&mut reverse);
        assert_eq!(forward, reverse);
        assert_eq!(names(&forward), vec!["z", "x", "y"]);
    }

    #[test]
    fn duplicates_keep_highest_weight() {
        let eps = dedupe_and_sort(vec![ep("a", 1), ep("b", 2), ep("a", 7)]);
        assert_eq!(names(&eps), vec!["a", "b"]);
        assert_eq!(eps[0].weight, 7);
    }

    #[test]
    fn same_name_on_distinct_nodes_is_kept() {
        let eps = dedupe_and_sort(vec![on_node("n1", "vl-edge", 1), on_node("n2", "vl-edge", 1)]);
        assert_eq!(eps.len(), 2);

        let mut other_inbound = on_node("n1", "vl-edge", 1);
        other_inbound.inbound_id = 2;
        let eps = dedupe_and_sort(vec![on_node("n1", "vl-edge", 1), other_inbound]);
        assert_eq!(eps.len(), 2);
    }

    #[test]
    fn node_ids_stay_out_of_serialized_form() {
        let value = serde_json::to_value(on_node("n1", "vl-edge", 1)).unwrap();
        assert!(value.get("node_id").is_none());
        assert!(value.get("inbound_id").is_none());
        assert_eq!(value["name"], "vl-edge");
    }
}
