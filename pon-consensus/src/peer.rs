//! Outbound calls to neighbour nodes

use crate::{Block, Node, Result, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A reputation change notification, forwarded unchanged along the broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationNotice {
    pub request_id: String,
    pub node_address: String,
    pub change_lvl: i32,
}

/// Peer RPCs the consensus core relies on.
///
/// `peer_url` is the neighbour's registered url. Any transport failure is reported as
/// [`crate::ConsensusError::PeerUnreachable`]; callers log it and move on to the next
/// neighbour.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
    /// Reputation of `node_url` if it is one of the peer's neighbours
    async fn neighbourhood_reputation(&self, peer_url: &str, node_url: &str) -> Result<Option<f64>>;

    /// Reputation of `node_url`, searched by the peer across its own neighbourhood
    async fn broadcast_reputation(
        &self,
        peer_url: &str,
        node_url: &str,
        request_id: &str,
    ) -> Result<Option<f64>>;

    async fn change_reputation(&self, peer_url: &str, notice: &ReputationNotice) -> Result<()>;

    async fn chain(&self, peer_url: &str) -> Result<Vec<Block>>;

    /// Candidate set of the peer, keyed by candidate address
    async fn candidates(&self, peer_url: &str) -> Result<BTreeMap<String, Node>>;

    /// Ask the peer to refresh its own candidate set
    async fn update_candidates(&self, peer_url: &str) -> Result<()>;

    /// Ask the peer to run chain conflict resolution
    async fn resolve(&self, peer_url: &str) -> Result<()>;

    async fn new_pending(&self, peer_url: &str, transaction: &Transaction) -> Result<()>;
}
