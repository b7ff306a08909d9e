//! Neighbour registry with bidirectional url/address lookup

use crate::node::validate_neighbour_url;
use crate::{Node, Result};
use std::collections::HashMap;

/// Known neighbours, indexed by url and by address.
///
/// Both maps are updated together on every mutation: `addresses[a] == u` iff
/// `nodes[u].address() == a`.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    /// url -> node
    nodes: HashMap<String, Node>,

    /// address -> url
    addresses: HashMap<String, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the neighbour at `address`.
    ///
    /// A known address keeps its reputation and only moves to the new url; an unknown one
    /// is created with `reputation`. Any other address previously registered at `url` is
    /// dropped so the two indexes stay consistent. The `myself` sentinel is not a
    /// neighbour url and is rejected.
    pub fn upsert(&mut self, url: &str, address: &str, reputation: f64) -> Result<&Node> {
        validate_neighbour_url(url)?;

        let reputation = self
            .by_address(address)
            .map_or(reputation, Node::reputation);
        let node = Node::new(url, address, reputation)?;

        if let Some(old_url) = self.addresses.remove(address) {
            self.nodes.remove(&old_url);
        }
        if let Some(displaced) = self.nodes.remove(url) {
            self.addresses.remove(displaced.address());
        }

        self.addresses.insert(address.to_string(), url.to_string());
        Ok(self.nodes.entry(url.to_string()).or_insert(node))
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.addresses.contains_key(address)
    }

    pub fn address_of(&self, url: &str) -> Option<&str> {
        self.nodes.get(url).map(Node::address)
    }

    pub fn url_of(&self, address: &str) -> Option<&str> {
        self.addresses.get(address).map(String::as_str)
    }

    pub fn by_url(&self, url: &str) -> Option<&Node> {
        self.nodes.get(url)
    }

    pub fn by_address(&self, address: &str) -> Option<&Node> {
        self.url_of(address).and_then(|url| self.nodes.get(url))
    }

    /// Add `delta` to the reputation of `address`, clamped to `[0, max]`.
    /// Returns the new reputation, or `None` when the address is not a neighbour.
    pub fn adjust_reputation(&mut self, address: &str, delta: f64, max: f64) -> Option<f64> {
        let url = self.addresses.get(address)?;
        let node = self.nodes.get_mut(url)?;
        let updated = (node.reputation() + delta).clamp(0.0, max);
        node.set_reputation(updated).ok()?;
        Some(updated)
    }

    /// `(url, address)` pairs of every neighbour, sorted by url
    pub fn neighbours(&self) -> Vec<(String, String)> {
        let mut neighbours: Vec<(String, String)> = self
            .nodes
            .values()
            .map(|node| (node.url().to_string(), node.address().to_string()))
            .collect();
        neighbours.sort();
        neighbours
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
