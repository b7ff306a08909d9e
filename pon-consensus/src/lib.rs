//! Proof-of-Negotiation consensus core
//!
//! This crate implements the state machine of a reputation-aware ledger node: the
//! neighbour registry, reputation gossip, the pending/confirmed transaction ledger,
//! longest-valid-chain resolution, and the negotiation protocol that picks the
//! validator allowed to append the next block.
//!
//! [`Blockchain`] is the node state and never touches the network. [`NodeService`] wraps
//! it behind a lock and performs the peer RPCs through [`PeerClient`] with that lock
//! released. Signature checks go through [`SignatureVerifier`] and timestamps through
//! [`Clock`].

pub mod blockchain;
pub mod chain;
pub mod clock;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod negotiation;
pub mod node;
pub mod peer;
pub mod proof;
pub mod registry;
pub mod reputation;
pub mod service;
pub mod transaction;

pub use blockchain::Blockchain;
pub use chain::{hash_block, valid_chain, Block};
pub use clock::{Clock, SystemClock};
pub use config::{ConsensusConfig, FalseSignaturePolicy};
pub use consensus::PeerChain;
pub use crypto::{address_of, RsaVerifier, SignatureVerifier};
pub use error::ConsensusError;
pub use negotiation::{
    negotiate, Asker, Bidder, NegotiationActor, NegotiationOutcome, Regime, Winner,
};
pub use node::Node;
pub use peer::{PeerClient, ReputationNotice};
pub use proof::{CandidateOffer, MineOutcome, Validator};
pub use registry::NodeRegistry;
pub use reputation::{ChangeStatus, SearchStep};
pub use service::{NodeService, Status};
pub use transaction::{Transaction, TransactionPool};

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Protocol constants shared by every node in the network
pub mod constants {
    /// Sender address of mining reward transactions
    pub const MINING_SENDER: &str = "THE BLOCKCHAIN";

    /// Candidate key and url a node uses for itself before peers learn its real url
    pub const MYSELF: &str = "myself";

    /// `previous_hash` of the genesis block
    pub const GENESIS_PREVIOUS_HASH: &str = "00";

    /// Upper bound of any node reputation
    pub const MAX_REPUTATION: f64 = 5.0;

    /// Reputation of a node nobody in the network knows about
    pub const DEFAULT_REPUTATION: f64 = 1.0;

    /// Seed used before the first negotiation round
    pub const INITIAL_SEED: u64 = 2_458_912;

    /// Gravity applied to a sender spending more than it owns
    pub const INSUFFICIENT_BALANCE_GRAVITY: i32 = -1;

    /// Gravity applied when a transaction signature does not verify
    pub const FALSE_SIGNATURE_GRAVITY: i32 = -3;

    /// Gravity applied to a neighbour advertising an invalid chain
    pub const INVALID_CHAIN_GRAVITY: i32 = -2;

    /// Gravity applied to the validator of an adopted chain
    pub const VALIDATION_MERIT: i32 = 1;
}
