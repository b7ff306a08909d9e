//! Shared, lock-protected node handle used by transports

use crate::blockchain::forward_transaction;
use crate::consensus::{fetch_chains, request_resolve};
use crate::constants::INVALID_CHAIN_GRAVITY;
use crate::node::validate_neighbour_url;
use crate::proof::{dissenting_neighbours, fetch_candidates, request_candidate_refresh};
use crate::reputation::{ask_neighbourhood, forward_notices, search_neighbours, SearchStep};
use crate::{
    Block, Blockchain, ChangeStatus, MineOutcome, Node, PeerClient, ReputationNotice, Result,
    Transaction,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Outcome reported to a caller instead of a raw error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub success: bool,
    pub message: String,
}

impl Status {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Cloneable handle to one node.
///
/// State changes happen under a single lock, so handlers never observe a half-applied
/// change. The lock is never held across a peer call: neighbours answer our requests by
/// calling back into us, and would otherwise wait on it until their call times out.
/// Operations take a snapshot of what they need, release the lock, talk to the
/// neighbours, then lock again to apply the answers.
#[derive(Clone)]
pub struct NodeService {
    inner: Arc<Mutex<Blockchain>>,
    peers: Arc<dyn PeerClient>,
}

impl NodeService {
    pub fn new(blockchain: Blockchain, peers: Arc<dyn PeerClient>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(blockchain)),
            peers,
        }
    }

    pub async fn node_id(&self) -> String {
        self.inner.lock().await.node_id().to_string()
    }

    /// `(url, address)` of every neighbour at this instant
    async fn neighbours(&self) -> Vec<(String, String)> {
        self.inner.lock().await.registry().neighbours()
    }

    /// Forward the reputation changes queued by the last operations
    async fn flush_notices(&self) {
        let (notices, neighbours) = {
            let mut blockchain = self.inner.lock().await;
            (blockchain.take_notices(), blockchain.registry().neighbours())
        };
        if !notices.is_empty() {
            forward_notices(self.peers.as_ref(), &neighbours, &notices).await;
        }
    }

    /// Register a neighbour.
    ///
    /// A known address keeps its reputation and only changes url. An unknown one gets the
    /// reputation the network reports for its url, or the default when nobody knows it.
    pub async fn register_node(&self, url: &str, address: &str) -> Status {
        if let Err(e) = validate_neighbour_url(url) {
            return Status::failed(e.to_string());
        }

        let known = self
            .inner
            .lock()
            .await
            .registry()
            .by_address(address)
            .map(Node::reputation);
        let reputation = match known {
            Some(reputation) => reputation,
            None => self.find_reputation(url).await,
        };

        match self.inner.lock().await.insert_node(url, address, reputation) {
            Ok(node) => Status::ok(format!(
                "Node {} registered with reputation {}",
                node.address(),
                node.reputation()
            )),
            Err(e) => Status::failed(e.to_string()),
        }
    }

    pub async fn nodes(&self) -> Vec<Node> {
        self.inner.lock().await.nodes()
    }

    /// `true` when the transaction was new
    pub async fn add_pending_transaction(&self, tx: Transaction) -> bool {
        self.inner.lock().await.add_pending_transaction(tx)
    }

    /// Queue a transaction and forward it to every neighbour if it is new
    pub async fn broadcast_transaction(&self, tx: Transaction) -> Status {
        let neighbours = {
            let mut blockchain = self.inner.lock().await;
            if !blockchain.add_pending_transaction(tx.clone()) {
                return Status::failed("Transaction already known");
            }
            blockchain.registry().neighbours()
        };

        forward_transaction(self.peers.as_ref(), &neighbours, &tx).await;
        Status::ok("Transaction broadcast")
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Status {
        let result = self.inner.lock().await.submit_transaction(tx);
        self.flush_notices().await;

        match result {
            Ok(block_number) => {
                Status::ok(format!("Transaction will be added to Block {}", block_number))
            }
            Err(e) => Status::failed(e.to_string()),
        }
    }

    /// Confirmed transactions waiting for the next block
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().await.transactions().to_vec()
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().await.pending_transactions().to_vec()
    }

    pub async fn chain(&self) -> Vec<Block> {
        self.inner.lock().await.chain().to_vec()
    }

    pub async fn balance_of(&self, address: &str) -> f64 {
        self.inner.lock().await.balance_of(address)
    }

    pub async fn candidates(&self) -> BTreeMap<String, Node> {
        self.inner.lock().await.candidates().clone()
    }

    /// Merge the candidate sets of our trusted neighbours into ours
    pub async fn update_candidates(&self) -> Status {
        let urls = self.inner.lock().await.trusted_neighbours();
        let offers = fetch_candidates(self.peers.as_ref(), &urls).await;

        let mut blockchain = self.inner.lock().await;
        blockchain.merge_candidates(offers);
        Status::ok(format!("{} candidates", blockchain.candidates().len()))
    }

    pub async fn neighbourhood_reputation(&self, node_url: &str) -> Option<f64> {
        self.inner.lock().await.neighbourhood_reputation(node_url)
    }

    /// Ask the network for the reputation of `node_url`.
    ///
    /// Direct neighbours are asked first; the first one that knows the node wins. Only
    /// when none does, a broadcast search is started. Nodes nobody knows get the default
    /// reputation.
    pub async fn find_reputation(&self, node_url: &str) -> f64 {
        let (neighbours, request_id, default) = {
            let mut blockchain = self.inner.lock().await;
            (
                blockchain.registry().neighbours(),
                blockchain.start_reputation_search(),
                blockchain.config().default_reputation,
            )
        };

        if let Some(reputation) = ask_neighbourhood(self.peers.as_ref(), &neighbours, node_url).await
        {
            return reputation;
        }
        if let Some(reputation) =
            search_neighbours(self.peers.as_ref(), &neighbours, node_url, &request_id).await
        {
            return reputation;
        }

        debug!("Nobody knows {}, using default reputation", node_url);
        default
    }

    /// Handle a broadcast reputation search coming from a peer.
    ///
    /// A request id seen before yields `None` without any further call, which is what
    /// stops the search from looping around cycles of the graph.
    pub async fn broadcast_find_reputation(&self, node_url: &str, request_id: &str) -> Option<f64> {
        let (step, neighbours) = {
            let mut blockchain = self.inner.lock().await;
            (
                blockchain.accept_reputation_search(node_url, request_id),
                blockchain.registry().neighbours(),
            )
        };

        match step {
            SearchStep::Seen => None,
            SearchStep::Known(reputation) => Some(reputation),
            SearchStep::Forward => {
                search_neighbours(self.peers.as_ref(), &neighbours, node_url, request_id).await
            }
        }
    }

    /// Apply a reputation change received from a peer
    pub async fn change_reputation(&self, notice: ReputationNotice) -> Status {
        let address = notice.node_address.clone();
        let result = self.inner.lock().await.apply_reputation_change(notice);
        self.flush_notices().await;

        match result {
            Ok(ChangeStatus::Applied) => Status::ok(format!("Node {} reputation changed", address)),
            Ok(ChangeStatus::Duplicate) => Status::failed("Request already processed"),
            Err(e) => Status::failed(e.to_string()),
        }
    }

    /// Adopt the longest valid chain of our neighbours; `true` when ours was replaced
    async fn adopt_neighbour_chains(&self) -> bool {
        let neighbours = self.neighbours().await;
        let chains = fetch_chains(self.peers.as_ref(), &neighbours).await;

        let replaced = self.inner.lock().await.adopt_longest_chain(chains);
        self.flush_notices().await;
        replaced
    }

    /// Resolve conflicts and ask the neighbours to follow when our chain changed
    pub async fn resolve_conflicts(&self) -> Status {
        if !self.adopt_neighbour_chains().await {
            return Status::ok("Our chain is authoritative");
        }

        let neighbours = self.neighbours().await;
        request_resolve(self.peers.as_ref(), &neighbours).await;
        Status::ok("Our chain was replaced")
    }

    /// One mining round.
    ///
    /// Resolves conflicts so every node negotiates from the same last block, gathers the
    /// candidates of the neighbours and asks them to refresh theirs, then negotiates. A
    /// forged block is announced and the neighbours that did not adopt it are penalized.
    pub async fn mine(&self) -> Result<MineOutcome> {
        if self.adopt_neighbour_chains().await {
            info!("Our chain was replaced");
        } else {
            info!("Our chain is authoritative");
        }

        let last = self.inner.lock().await.begin_round()?;
        self.update_candidates().await;

        let neighbours = self.neighbours().await;
        request_candidate_refresh(self.peers.as_ref(), &neighbours).await;

        let settled = self.inner.lock().await.settle_round(&last);
        self.flush_notices().await;
        let outcome = match settled {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Mining round aborted: {}", e);
                return Err(e);
            }
        };

        if let MineOutcome::Forged(block) = &outcome {
            info!("Announcing block {}", block.block_number);
            let neighbours = self.neighbours().await;
            request_resolve(self.peers.as_ref(), &neighbours).await;

            let node_id = self.node_id().await;
            let dissenting = dissenting_neighbours(self.peers.as_ref(), &neighbours, &node_id).await;
            if !dissenting.is_empty() {
                {
                    let mut blockchain = self.inner.lock().await;
                    for address in dissenting {
                        blockchain.penalize(&address, INVALID_CHAIN_GRAVITY);
                    }
                }
                self.flush_notices().await;
            }
        }
        Ok(outcome)
    }
}
