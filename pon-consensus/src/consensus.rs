//! Longest valid chain resolution

use crate::constants::{INVALID_CHAIN_GRAVITY, VALIDATION_MERIT};
use crate::{valid_chain, Block, Blockchain, ConsensusError, PeerClient, Result};
use tracing::{info, warn};

/// Chain advertised by one neighbour
#[derive(Debug, Clone, PartialEq)]
pub struct PeerChain {
    pub url: String,
    pub address: String,
    pub chain: Vec<Block>,
}

impl PeerChain {
    /// Rejects a chain whose hash links are broken
    pub fn check(&self) -> Result<()> {
        if !valid_chain(&self.chain) {
            return Err(ConsensusError::ConsensusRejected(format!(
                "{} advertised an invalid chain of length {}",
                self.url,
                self.chain.len()
            )));
        }
        Ok(())
    }
}

impl Blockchain {
    /// Replace our chain with the longest valid one among `candidates`.
    ///
    /// Candidates are considered in order and only strictly longer chains win, so on equal
    /// length the first one keeps it. Neighbours advertising an invalid chain are
    /// penalized. When the chain is replaced the validator of the new last block earns a
    /// merit, applied locally only.
    ///
    /// Returns `true` when our chain was replaced.
    pub fn adopt_longest_chain(&mut self, candidates: Vec<PeerChain>) -> bool {
        let mut max_length = self.chain.len();
        let mut new_chain = None;

        for candidate in candidates {
            if let Err(e) = candidate.check() {
                warn!("{}", e);
                self.penalize(&candidate.address, INVALID_CHAIN_GRAVITY);
                continue;
            }
            if candidate.chain.len() > max_length {
                max_length = candidate.chain.len();
                new_chain = Some(candidate.chain);
            }
        }

        let Some(chain) = new_chain else {
            return false;
        };

        self.chain = chain;
        info!("Chain replaced, now {} blocks long", self.chain.len());

        if let Some(validator) = self.last_block().validator.clone() {
            if let Err(e) = self.change_reputation(&validator, VALIDATION_MERIT, false) {
                warn!("Could not reward validator {}: {}", validator, e);
            }
        }
        true
    }
}

/// Chains of every reachable neighbour, in neighbour order
pub(crate) async fn fetch_chains(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
) -> Vec<PeerChain> {
    let mut chains = Vec::with_capacity(neighbours.len());
    for (url, address) in neighbours {
        match peers.chain(url).await {
            Ok(chain) => chains.push(PeerChain {
                url: url.clone(),
                address: address.clone(),
                chain,
            }),
            Err(e) => warn!("Chain of {} skipped: {}", url, e),
        }
    }
    chains
}

/// Ask every neighbour to run conflict resolution
pub(crate) async fn request_resolve(peers: &dyn PeerClient, neighbours: &[(String, String)]) {
    for (url, _) in neighbours {
        if let Err(e) = peers.resolve(url).await {
            warn!("Resolve not propagated to {}: {}", url, e);
        }
    }
}
