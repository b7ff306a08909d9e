//! In-memory neighbours for driving a node without a transport

#![allow(dead_code)]

use pon_consensus::*;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted neighbour answers
#[derive(Debug, Clone, Default)]
pub struct ScriptedPeer {
    pub chain: Vec<Block>,
    pub candidates: BTreeMap<String, Node>,
    /// node url -> reputation known by this neighbour
    pub known: HashMap<String, f64>,
    pub offline: bool,
}

#[derive(Default)]
pub struct MockPeerClient {
    peers: Mutex<HashMap<String, ScriptedPeer>>,
    calls: Mutex<Vec<String>>,
}

impl MockPeerClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, peer: ScriptedPeer) {
        self.peers.lock().unwrap().insert(url.to_string(), peer);
    }

    /// Every call made so far, as `<rpc> <peer_url>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, rpc: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(&format!("{} ", rpc)))
            .count()
    }

    fn answer(&self, rpc: &str, peer_url: &str) -> Result<ScriptedPeer> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", rpc, peer_url));
        let peer = self
            .peers
            .lock()
            .unwrap()
            .get(peer_url)
            .cloned()
            .unwrap_or_default();
        if peer.offline {
            return Err(ConsensusError::unreachable(peer_url, "connection refused"));
        }
        Ok(peer)
    }
}

#[async_trait::async_trait]
impl PeerClient for MockPeerClient {
    async fn neighbourhood_reputation(&self, peer_url: &str, node_url: &str) -> Result<Option<f64>> {
        Ok(self
            .answer("neighbourhood_reputation", peer_url)?
            .known
            .get(node_url)
            .copied())
    }

    async fn broadcast_reputation(
        &self,
        peer_url: &str,
        node_url: &str,
        _request_id: &str,
    ) -> Result<Option<f64>> {
        Ok(self
            .answer("broadcast_reputation", peer_url)?
            .known
            .get(node_url)
            .copied())
    }

    async fn change_reputation(&self, peer_url: &str, _notice: &ReputationNotice) -> Result<()> {
        self.answer("change_reputation", peer_url).map(|_| ())
    }

    async fn chain(&self, peer_url: &str) -> Result<Vec<Block>> {
        Ok(self.answer("chain", peer_url)?.chain)
    }

    async fn candidates(&self, peer_url: &str) -> Result<BTreeMap<String, Node>> {
        Ok(self.answer("candidates", peer_url)?.candidates)
    }

    async fn update_candidates(&self, peer_url: &str) -> Result<()> {
        self.answer("update_candidates", peer_url).map(|_| ())
    }

    async fn resolve(&self, peer_url: &str) -> Result<()> {
        self.answer("resolve", peer_url).map(|_| ())
    }

    async fn new_pending(&self, peer_url: &str, _transaction: &Transaction) -> Result<()> {
        self.answer("new_pending", peer_url).map(|_| ())
    }
}

/// Real nodes wired to each other in process, every call bounded by `timeout`
pub struct LocalNetwork {
    nodes: Mutex<HashMap<String, NodeService>>,
    timeout: Duration,
}

impl LocalNetwork {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Start a node answering at `url`
    pub fn spawn(self: &Arc<Self>, url: &str, address: &str) -> NodeService {
        let blockchain = Blockchain::new(
            address,
            ConsensusConfig::default(),
            Arc::new(AcceptAll),
            Arc::new(SystemClock::new()),
        )
        .unwrap();
        let service = NodeService::new(blockchain, self.clone());
        self.nodes
            .lock()
            .unwrap()
            .insert(url.to_string(), service.clone());
        service
    }

    fn node(&self, peer_url: &str) -> Result<NodeService> {
        self.nodes
            .lock()
            .unwrap()
            .get(peer_url)
            .cloned()
            .ok_or_else(|| ConsensusError::unreachable(peer_url, "no such node"))
    }

    async fn within<T>(&self, peer_url: &str, call: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ConsensusError::unreachable(peer_url, "timed out"))
    }
}

#[async_trait::async_trait]
impl PeerClient for LocalNetwork {
    async fn neighbourhood_reputation(&self, peer_url: &str, node_url: &str) -> Result<Option<f64>> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.neighbourhood_reputation(node_url))
            .await
    }

    async fn broadcast_reputation(
        &self,
        peer_url: &str,
        node_url: &str,
        request_id: &str,
    ) -> Result<Option<f64>> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.broadcast_find_reputation(node_url, request_id))
            .await
    }

    async fn change_reputation(&self, peer_url: &str, notice: &ReputationNotice) -> Result<()> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.change_reputation(notice.clone()))
            .await
            .map(|_| ())
    }

    async fn chain(&self, peer_url: &str) -> Result<Vec<Block>> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.chain()).await
    }

    async fn candidates(&self, peer_url: &str) -> Result<BTreeMap<String, Node>> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.candidates()).await
    }

    async fn update_candidates(&self, peer_url: &str) -> Result<()> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.update_candidates())
            .await
            .map(|_| ())
    }

    async fn resolve(&self, peer_url: &str) -> Result<()> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.resolve_conflicts())
            .await
            .map(|_| ())
    }

    async fn new_pending(&self, peer_url: &str, transaction: &Transaction) -> Result<()> {
        let node = self.node(peer_url)?;
        self.within(peer_url, node.add_pending_transaction(transaction.clone()))
            .await
            .map(|_| ())
    }
}

/// Accepts every signature
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _public_key: &str, _signature: &str, _payload: &[u8]) -> bool {
        true
    }
}

pub fn node_with(config: ConsensusConfig) -> Blockchain {
    Blockchain::new(
        "local-node",
        config,
        Arc::new(RsaVerifier::new()),
        Arc::new(SystemClock::new()),
    )
    .unwrap()
}

pub fn node() -> Blockchain {
    node_with(ConsensusConfig::default())
}

/// A fresh node behind a service talking to `peers`
pub fn service(peers: Arc<MockPeerClient>) -> NodeService {
    NodeService::new(node(), peers)
}

/// A valid chain of `len` blocks, the last one forged by `validator`
pub fn build_chain(len: usize, validator: &str) -> Vec<Block> {
    let mut chain = vec![Block::genesis(1_000.0, 77)];
    while chain.len() < len {
        let previous = chain.last().unwrap();
        let block = Block {
            block_number: previous.block_number + 1,
            timestamp: previous.timestamp + 10.0,
            transactions: Vec::new(),
            random_factor: previous.random_factor + 1,
            validator: Some(validator.to_string()),
            negotiation_price: Some(0.8),
            previous_hash: previous.hash().unwrap(),
        };
        chain.push(block);
    }
    chain
}

/// Grow the local chain by `count` empty blocks
pub fn extend_local(blockchain: &mut Blockchain, count: usize) {
    for _ in 0..count {
        let previous_hash = blockchain.last_block().hash().unwrap();
        blockchain.create_block(previous_hash, None, None).unwrap();
    }
}
