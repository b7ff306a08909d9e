//! Block structure, canonical hashing and chain validation

use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::{Result, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A block as exchanged between peers.
///
/// Every field is always serialized (absent values as `null`): field presence is part of
/// the hash and therefore of the peer contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// 1-based position in the chain
    pub block_number: u64,

    pub timestamp: f64,

    pub transactions: Vec<Transaction>,

    /// Seed of the next negotiation round
    pub random_factor: u64,

    /// Address of the node that won the right to append this block
    pub validator: Option<String>,

    /// Price paid for that right
    pub negotiation_price: Option<f64>,

    pub previous_hash: String,
}

impl Block {
    /// First block of a chain: no validator, no price, previous hash `"00"`
    pub fn genesis(timestamp: f64, random_factor: u64) -> Self {
        Block {
            block_number: 1,
            timestamp,
            transactions: Vec::new(),
            random_factor,
            validator: None,
            negotiation_price: None,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        }
    }

    pub fn hash(&self) -> Result<String> {
        hash_block(self)
    }
}

/// SHA-256 hex digest of the block serialized with sorted object keys.
///
/// Going through `serde_json::Value` sorts the keys of every object (including nested
/// transactions), so the digest depends on content only. The encoding is compact, with no
/// whitespace between tokens; nodes hashing a spaced encoding compute different digests.
pub fn hash_block(block: &Block) -> Result<String> {
    let canonical = serde_json::to_value(block)?;
    let block_bytes = serde_json::to_vec(&canonical)?;

    let mut hasher = Sha256::new();
    hasher.update(&block_bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// A chain is valid iff every block links to the hash of its predecessor
pub fn valid_chain(chain: &[Block]) -> bool {
    chain.windows(2).all(|pair| match hash_block(&pair[0]) {
        Ok(hash) => pair[1].previous_hash == hash,
        Err(_) => false,
    })
}

/// Net value received by `address` over every transaction of the chain.
///
/// A full scan on every call; there is no balance index.
pub fn balance_of(chain: &[Block], address: &str) -> f64 {
    chain
        .iter()
        .flat_map(|block| block.transactions.iter())
        .fold(0.0, |balance, tx| {
            if tx.recipient_address == address {
                balance + tx.value
            } else if tx.sender_address == address {
                balance - tx.value
            } else {
                balance
            }
        })
}
