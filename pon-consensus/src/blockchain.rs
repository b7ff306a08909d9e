//! Node state: chain, transaction ledger and neighbour registry

use crate::chain::balance_of;
use crate::constants::{FALSE_SIGNATURE_GRAVITY, INITIAL_SEED, INSUFFICIENT_BALANCE_GRAVITY};
use crate::{
    Block, Clock, ConsensusConfig, ConsensusError, FalseSignaturePolicy, Node, NodeRegistry,
    PeerClient, ReputationNotice, Result, SignatureVerifier, Transaction, TransactionPool,
};
use rand::rngs::OsRng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything one node owns.
///
/// A synchronous state machine: nothing here talks to the network. Reputation changes
/// that must reach the neighbours are queued and handed out by [`Self::take_notices`].
/// Concurrent callers go through [`crate::NodeService`], which serializes them behind a
/// single lock and performs every peer call with the lock released.
pub struct Blockchain {
    /// Our address (hex public key)
    pub(crate) node_id: String,

    pub(crate) config: ConsensusConfig,

    /// Validated blocks, never empty
    pub(crate) chain: Vec<Block>,

    /// Received transactions waiting for the next block
    pub(crate) pool: TransactionPool,

    /// Verified transactions that will go into the next block
    pub(crate) transactions: Vec<Transaction>,

    pub(crate) registry: NodeRegistry,

    /// Negotiation candidates of the current round, keyed by address
    pub(crate) candidates: BTreeMap<String, Node>,

    /// Reputation request ids already handled, never pruned
    pub(crate) reputation_requests: HashSet<String>,

    /// Reputation changes not yet forwarded to the neighbours
    pub(crate) notices: Vec<ReputationNotice>,

    /// Deterministic generator, reseeded from the last block every round
    pub(crate) rng: ChaCha20Rng,

    pub(crate) verifier: Arc<dyn SignatureVerifier>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Blockchain {
    /// Create a node holding a fresh genesis block
    pub fn new(
        node_id: impl Into<String>,
        config: ConsensusConfig,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let genesis = Block::genesis(clock.now(), OsRng.gen_range(0..=config.max_seed));
        let node_id = node_id.into();
        info!("Node {} starting with genesis block", node_id);

        Ok(Self {
            node_id,
            config,
            chain: vec![genesis],
            pool: TransactionPool::new(),
            transactions: Vec::new(),
            registry: NodeRegistry::new(),
            candidates: BTreeMap::new(),
            reputation_requests: HashSet::new(),
            notices: Vec::new(),
            rng: ChaCha20Rng::seed_from_u64(INITIAL_SEED),
            verifier,
            clock,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn last_block(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Verified transactions of the next block
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        self.pool.pending()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.registry.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.url().cmp(b.url()));
        nodes
    }

    /// Number the next block will carry
    pub fn next_block_number(&self) -> u64 {
        self.chain.len() as u64 + 1
    }

    /// Balance of `address` over the whole chain
    pub fn balance_of(&self, address: &str) -> f64 {
        balance_of(&self.chain, address)
    }

    /// Chain balance minus what `address` already spends in the next block
    pub fn spendable_balance(&self, address: &str) -> f64 {
        self.transactions
            .iter()
            .fold(self.balance_of(address), |balance, tx| {
                if tx.recipient_address == address {
                    balance + tx.value
                } else if tx.sender_address == address {
                    balance - tx.value
                } else {
                    balance
                }
            })
    }

    /// Record a neighbour under `url`.
    ///
    /// A known address keeps its reputation and only changes url; `reputation` is used
    /// for new ones, clamped to the configured bounds. The reputation search that
    /// produces it runs outside the node lock, see [`crate::NodeService::register_node`].
    pub fn insert_node(&mut self, url: &str, address: &str, reputation: f64) -> Result<Node> {
        let reputation = reputation.clamp(0.0, self.config.max_reputation);
        let node = self.registry.upsert(url, address, reputation)?.clone();
        info!(
            "Registered node {} at {} with reputation {}",
            address,
            url,
            node.reputation()
        );
        Ok(node)
    }

    /// Queue a received transaction; `false` when it was already seen.
    ///
    /// Reward transactions are only minted locally and never accepted from the pool.
    pub fn add_pending_transaction(&mut self, tx: Transaction) -> bool {
        if tx.is_reward() {
            warn!("Refusing pending reward transaction {}", tx.key());
            return false;
        }
        self.pool.add(tx)
    }

    /// Verify a transaction and confirm it for the next block.
    ///
    /// Returns the number of the block it will land in. Rewards skip every check. A
    /// sender spending more than it owns is penalized; an unverifiable signature penalizes
    /// the address chosen by [`FalseSignaturePolicy`].
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<u64> {
        if tx.is_reward() {
            self.transactions.push(tx);
            return Ok(self.next_block_number());
        }

        let verified = match &tx.signature {
            Some(signature) => {
                self.verifier
                    .verify(&tx.sender_address, signature, &tx.signing_data()?)
            }
            None => false,
        };

        if !verified {
            let target = match self.config.false_signature_policy {
                FalseSignaturePolicy::Recipient => Some(tx.recipient_address.clone()),
                FalseSignaturePolicy::Sender => Some(tx.sender_address.clone()),
                FalseSignaturePolicy::None => None,
            };
            if let Some(address) = target {
                self.penalize(&address, FALSE_SIGNATURE_GRAVITY);
            }
            return Err(ConsensusError::InvalidSignature(tx.sender_address));
        }

        let available = self.spendable_balance(&tx.sender_address);
        if available < tx.value {
            self.penalize(&tx.sender_address, INSUFFICIENT_BALANCE_GRAVITY);
            return Err(ConsensusError::InsufficientBalance {
                needed: tx.value,
                available,
            });
        }

        self.transactions.push(tx);
        Ok(self.next_block_number())
    }

    /// Flush the pending pool through [`Self::submit_transaction`], then seal every
    /// confirmed transaction into a new block appended to the chain.
    pub fn create_block(
        &mut self,
        previous_hash: String,
        validator: Option<String>,
        negotiation_price: Option<f64>,
    ) -> Result<Block> {
        for tx in self.pool.drain() {
            let key = tx.key();
            if let Err(e) = self.submit_transaction(tx) {
                warn!("Dropping pending transaction {}: {}", key, e);
            }
        }

        let block = Block {
            block_number: self.next_block_number(),
            timestamp: self.clock.now(),
            transactions: std::mem::take(&mut self.transactions),
            random_factor: self.rng.gen_range(0..=self.config.max_seed),
            validator,
            negotiation_price,
            previous_hash,
        };

        info!(
            "Forged block {} with {} transactions",
            block.block_number,
            block.transactions.len()
        );
        self.chain.push(block.clone());
        Ok(block)
    }
}

/// Hand a new pending transaction to every neighbour
pub(crate) async fn forward_transaction(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
    tx: &Transaction,
) {
    for (url, _) in neighbours {
        match peers.new_pending(url, tx).await {
            Ok(()) => debug!("Forwarded transaction {} to {}", tx.key(), url),
            Err(e) => warn!("Failed to forward transaction to {}: {}", url, e),
        }
    }
}
