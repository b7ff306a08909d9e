//! Reputation search and change propagation across the neighbour graph

use crate::constants::{FALSE_SIGNATURE_GRAVITY, VALIDATION_MERIT};
use crate::{Blockchain, ConsensusError, PeerClient, ReputationNotice, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Result of handling a reputation change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// The change was applied and forwarded
    Applied,
    /// The request id was already handled, nothing happened
    Duplicate,
}

/// How a node answers a broadcast reputation search
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchStep {
    /// The request id was handled before; answer nothing
    Seen,
    /// The node is one of our neighbours
    Known(f64),
    /// Unknown here, ask our own neighbours
    Forward,
}

/// Gravities outside `[FALSE_SIGNATURE_GRAVITY, VALIDATION_MERIT]` and zero are rejected
fn check_gravity(gravity: i32) -> Result<()> {
    if gravity == 0 || !(FALSE_SIGNATURE_GRAVITY..=VALIDATION_MERIT).contains(&gravity) {
        return Err(ConsensusError::Validation(format!(
            "Gravity {} outside [{}, {}] or zero",
            gravity, FALSE_SIGNATURE_GRAVITY, VALIDATION_MERIT
        )));
    }
    Ok(())
}

impl Blockchain {
    /// `<node_id><timestamp><suffix>`, unique because the clock never repeats
    fn request_id(&self, suffix: &str) -> String {
        format!("{}{}{}", self.node_id, self.clock.now(), suffix)
    }

    /// Reputation of `node_url` if it is one of our neighbours
    pub fn neighbourhood_reputation(&self, node_url: &str) -> Option<f64> {
        self.registry.by_url(node_url).map(|node| node.reputation())
    }

    /// Open a reputation search of our own.
    ///
    /// The returned id is marked as handled before anyone sees it, so the search stops
    /// when it comes back to us through a cycle of the graph.
    pub fn start_reputation_search(&mut self) -> String {
        let request_id = self.request_id("RS");
        self.reputation_requests.insert(request_id.clone());
        request_id
    }

    /// First step of a broadcast reputation search received from a peer
    pub fn accept_reputation_search(&mut self, node_url: &str, request_id: &str) -> SearchStep {
        if !self.reputation_requests.insert(request_id.to_string()) {
            debug!("Search {} already handled", request_id);
            return SearchStep::Seen;
        }

        match self.neighbourhood_reputation(node_url) {
            Some(reputation) => SearchStep::Known(reputation),
            None => SearchStep::Forward,
        }
    }

    /// Change the reputation of `address` by `gravity` steps of the configured penalty.
    ///
    /// Negative gravities are penalties, positive ones merits. With `broadcast` the change
    /// is queued for the neighbours under a fresh request id.
    pub fn change_reputation(
        &mut self,
        address: &str,
        gravity: i32,
        broadcast: bool,
    ) -> Result<ChangeStatus> {
        let notice = ReputationNotice {
            request_id: self.request_id("RC"),
            node_address: address.to_string(),
            change_lvl: gravity,
        };
        self.propagate(notice, broadcast)
    }

    /// Handle a reputation change forwarded by a peer
    pub fn apply_reputation_change(&mut self, notice: ReputationNotice) -> Result<ChangeStatus> {
        self.propagate(notice, true)
    }

    /// Apply a penalty, logging instead of failing
    pub(crate) fn penalize(&mut self, address: &str, gravity: i32) {
        if let Err(e) = self.change_reputation(address, gravity, true) {
            warn!("Could not penalize {}: {}", address, e);
        }
    }

    /// Reputation changes waiting to be forwarded, oldest first
    pub fn take_notices(&mut self) -> Vec<ReputationNotice> {
        std::mem::take(&mut self.notices)
    }

    fn propagate(&mut self, notice: ReputationNotice, broadcast: bool) -> Result<ChangeStatus> {
        check_gravity(notice.change_lvl)?;

        if !self.reputation_requests.insert(notice.request_id.clone()) {
            debug!("Reputation change {} already handled", notice.request_id);
            return Ok(ChangeStatus::Duplicate);
        }

        let delta = f64::from(notice.change_lvl) * self.config.reputation_penalty;
        match self
            .registry
            .adjust_reputation(&notice.node_address, delta, self.config.max_reputation)
        {
            Some(reputation) => info!(
                "Reputation of {} is now {}",
                notice.node_address, reputation
            ),
            None => debug!("{} is not a neighbour", notice.node_address),
        }

        if broadcast {
            self.notices.push(notice);
        }
        Ok(ChangeStatus::Applied)
    }
}

/// Ask each neighbour whether `node_url` is one of theirs; the first answer wins
pub(crate) async fn ask_neighbourhood(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
    node_url: &str,
) -> Option<f64> {
    for (url, _) in neighbours {
        match peers.neighbourhood_reputation(url, node_url).await {
            Ok(Some(reputation)) => return Some(reputation),
            Ok(None) => {}
            Err(e) => warn!("Reputation lookup skipped {}: {}", url, e),
        }
    }
    None
}

/// Forward a broadcast search under `request_id`; the first neighbour that finds it wins
pub(crate) async fn search_neighbours(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
    node_url: &str,
    request_id: &str,
) -> Option<f64> {
    for (url, _) in neighbours {
        match peers.broadcast_reputation(url, node_url, request_id).await {
            Ok(Some(reputation)) => return Some(reputation),
            Ok(None) => {}
            Err(e) => warn!("Reputation search skipped {}: {}", url, e),
        }
    }
    None
}

/// Send every queued notice to every neighbour
pub(crate) async fn forward_notices(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
    notices: &[ReputationNotice],
) {
    for notice in notices {
        for (url, _) in neighbours {
            if let Err(e) = peers.change_reputation(url, notice).await {
                warn!("Reputation change not forwarded to {}: {}", url, e);
            }
        }
    }
}
