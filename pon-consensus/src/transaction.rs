//! Value transfers and the pending transaction pool

use crate::constants::MINING_SENDER;
use crate::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A transfer of value between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Hex encoded public key of the sender, or [`MINING_SENDER`] for rewards
    pub sender_address: String,

    pub recipient_address: String,

    pub value: f64,

    /// Seconds since the epoch at creation
    pub timestamp: f64,

    /// Hex encoded signature; reward transactions carry none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    pub fn new(
        sender_address: impl Into<String>,
        recipient_address: impl Into<String>,
        value: f64,
        timestamp: f64,
        signature: Option<String>,
    ) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConsensusError::Validation(format!(
                "Transaction value must be a non-negative number, got {}",
                value
            )));
        }

        Ok(Self {
            sender_address: sender_address.into(),
            recipient_address: recipient_address.into(),
            value,
            timestamp,
            signature,
        })
    }

    /// Block reward credited by the network itself
    pub fn reward(recipient_address: impl Into<String>, value: f64, timestamp: f64) -> Result<Self> {
        Self::new(MINING_SENDER, recipient_address, value, timestamp, None)
    }

    pub fn is_reward(&self) -> bool {
        self.sender_address == MINING_SENDER
    }

    /// Uniqueness key in the pending pool: `sender,recipient,timestamp`
    pub fn key(&self) -> String {
        format!(
            "{},{},{}",
            self.sender_address, self.recipient_address, self.timestamp
        )
    }

    /// Bytes covered by the sender's signature (every field but the signature)
    pub fn signing_data(&self) -> Result<Vec<u8>> {
        let signing_tx = SignableTx {
            recipient_address: &self.recipient_address,
            sender_address: &self.sender_address,
            timestamp: self.timestamp,
            value: self.value,
        };

        Ok(serde_json::to_vec(&signing_tx)?)
    }
}

/// Transaction data for signing, fields in sorted order
#[derive(Serialize)]
struct SignableTx<'a> {
    recipient_address: &'a str,
    sender_address: &'a str,
    timestamp: f64,
    value: f64,
}

/// Transactions received but not yet verified, in arrival order
#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: Vec<Transaction>,

    /// Keys of pending transactions
    pending_keys: HashSet<String>,

    /// Keys of transactions already flushed into a block
    settled_keys: HashSet<String>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction; `false` when its key was already seen
    pub fn add(&mut self, tx: Transaction) -> bool {
        let key = tx.key();
        if self.pending_keys.contains(&key) || self.settled_keys.contains(&key) {
            return false;
        }

        self.pending_keys.insert(key);
        self.pending.push(tx);
        true
    }

    /// Take every pending transaction, remembering their keys so replays are refused
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.settled_keys.extend(self.pending_keys.drain());
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(timestamp: f64) -> Transaction {
        Transaction::new("alice", "bob", 5.0, timestamp, Some("beef".into())).unwrap()
    }

    #[test]
    fn test_transaction_key() {
        assert_eq!(transfer(12.5).key(), "alice,bob,12.5");
    }

    #[test]
    fn test_negative_value_rejected() {
        assert!(Transaction::new("alice", "bob", -1.0, 1.0, None).is_err());
    }

    #[test]
    fn test_add_is_idempotent_per_key() {
        let mut pool = TransactionPool::new();
        assert!(pool.add(transfer(1.0)));
        assert!(!pool.add(transfer(1.0)));
        assert!(pool.add(transfer(2.0)));
        assert_eq!(pool.pending_count(), 2);
    }

    #[test]
    fn test_drain_blocks_replay() {
        let mut pool = TransactionPool::new();
        pool.add(transfer(1.0));

        let drained = pool.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(pool.pending_count(), 0);
        assert!(!pool.add(transfer(1.0)));
    }

    #[test]
    fn test_signing_data_excludes_signature() {
        let signed = transfer(3.0);
        let mut unsigned = signed.clone();
        unsigned.signature = None;
        assert_eq!(signed.signing_data().unwrap(), unsigned.signing_data().unwrap());
    }

    #[test]
    fn test_reward_serializes_without_signature() {
        let reward = Transaction::reward("miner", 1.0, 10.0).unwrap();
        assert!(reward.is_reward());
        let json = serde_json::to_value(&reward).unwrap();
        assert!(json.get("signature").is_none());
    }
}
