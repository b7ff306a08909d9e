//! Error types for the consensus system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("There are not enough operators to proceed: need at least 3, got {found}")]
    NotEnoughOperators { found: usize },

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Chain rejected: {0}")]
    ConsensusRejected(String),

    #[error("Invalid transaction signature from {0}")]
    InvalidSignature(String),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsensusError {
    /// Errors that end a negotiation round without a winner instead of aborting the node
    pub fn is_round_failure(&self) -> bool {
        matches!(
            self,
            ConsensusError::NotEnoughOperators { .. } | ConsensusError::Validation(_)
        )
    }

    pub fn unreachable(peer: impl Into<String>, reason: impl ToString) -> Self {
        ConsensusError::PeerUnreachable {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_failure_classification() {
        assert!(ConsensusError::NotEnoughOperators { found: 2 }.is_round_failure());
        assert!(ConsensusError::Validation("offer".into()).is_round_failure());
        assert!(!ConsensusError::unreachable("10.0.0.1:5000", "timeout").is_round_failure());
    }
}
