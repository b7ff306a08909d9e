//! Proof of negotiation: candidate selection, the negotiation round and block forging
//!
//! A round runs in steps so the node lock can be released around every peer call:
//! [`Blockchain::begin_round`], then [`Blockchain::merge_candidates`] with the candidate
//! sets fetched from the neighbours, then [`Blockchain::settle_round`]. The sequencing
//! lives in [`crate::NodeService::mine`].

use crate::constants::MINING_SENDER;
use crate::{
    negotiate, Asker, Bidder, Block, Blockchain, ConsensusError, NegotiationActor, Node,
    PeerClient, Regime, Result, Transaction,
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Winner of a negotiation round
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    pub node: Node,
    pub negotiation_price: f64,
    pub regime: Regime,
}

/// What a mining round produced
#[derive(Debug, Clone, PartialEq)]
pub enum MineOutcome {
    /// We won and appended this block
    Forged(Block),
    /// Another node won the right to forge
    Lost(Validator),
    /// The round ended without a winner
    NoWinner,
}

/// Candidate set offered by one neighbour
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOffer {
    /// Registered url of the neighbour that sent it
    pub url: String,
    pub candidates: BTreeMap<String, Node>,
}

impl Blockchain {
    /// Candidates of the current round, keyed by address
    pub fn candidates(&self) -> &BTreeMap<String, Node> {
        &self.candidates
    }

    /// What a node needs to take part in a negotiation: its balance plus one reward
    fn negotiation_budget(&self, address: &str) -> f64 {
        self.balance_of(address).max(0.0) + self.config.mining_reward
    }

    /// Urls of the neighbours reputable enough to contribute candidates
    pub fn trusted_neighbours(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .registry
            .nodes()
            .filter(|node| node.reputation() >= self.config.minimum_reputation)
            .map(|node| node.url().to_string())
            .collect();
        urls.sort();
        urls
    }

    /// Merge the candidate sets of our neighbours into ours.
    ///
    /// Precedence: an entry a neighbour reports for itself (url `myself`) takes that
    /// neighbour's url, and a candidate we know as a neighbour (by url, then by address) is
    /// replaced by our own record of it. Our own address is never merged, we hold our own
    /// entry. Candidates that cannot afford the previous negotiation price are dropped, and
    /// the first offer of an address wins over later ones.
    pub fn merge_candidates(&mut self, offers: Vec<CandidateOffer>) {
        let previous_price = self.last_block().negotiation_price.unwrap_or(0.0);
        let mut merged: BTreeMap<String, Node> = BTreeMap::new();

        for offer in offers {
            for candidate in offer.candidates.into_values() {
                let url = if candidate.is_myself() {
                    offer.url.clone()
                } else {
                    candidate.url().to_string()
                };
                let known = self
                    .registry
                    .by_url(&url)
                    .or_else(|| self.registry.by_address(candidate.address()))
                    .cloned();
                let candidate = match known {
                    Some(known) => known,
                    None => {
                        let mut candidate = candidate;
                        if let Err(e) = candidate.set_url(url) {
                            warn!("Candidate from {} skipped: {}", offer.url, e);
                            continue;
                        }
                        candidate
                    }
                };

                if candidate.address() == self.node_id || merged.contains_key(candidate.address())
                {
                    continue;
                }
                if self.balance_of(candidate.address()) + self.config.mining_reward > previous_price
                {
                    merged.insert(candidate.address().to_string(), candidate);
                } else {
                    debug!(
                        "Candidate {} cannot afford price {}",
                        candidate.address(),
                        previous_price
                    );
                }
            }
        }
        self.candidates.extend(merged);
    }

    /// Candidates allowed into the draw after `last`: everyone but its validator
    pub fn eligible_candidates(&self, last: &Block) -> Vec<Node> {
        self.candidates
            .values()
            .filter(|candidate| last.validator.as_deref() != Some(candidate.address()))
            .cloned()
            .collect()
    }

    /// Draw up to `real_candidates_number + 1` distinct candidates, weighted by reputation.
    ///
    /// Drawn candidates get weight zero, so nobody is picked twice. Candidates with zero
    /// reputation are never picked.
    fn choose_candidates(&mut self, last: &Block) -> Vec<Node> {
        let pool = self.eligible_candidates(last);
        let mut weights: Vec<f64> = pool.iter().map(Node::reputation).collect();

        let mut chosen = Vec::new();
        for _ in 0..=self.config.real_candidates_number {
            let Ok(distribution) = WeightedIndex::new(&weights) else {
                break;
            };
            let index = distribution.sample(&mut self.rng);
            weights[index] = 0.0;
            chosen.push(pool[index].clone());
        }
        chosen
    }

    /// Uniform draw in `[low, high]`, or `low` when the range is empty
    fn draw_offer(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.rng.gen_range(low..=high)
        } else {
            low
        }
    }

    /// Run the negotiation between the chosen candidates.
    ///
    /// The first chosen candidate asks, the rest operate. The bidder is the validator of
    /// the last block, or the blockchain itself right after genesis.
    fn run_negotiation(&mut self, last: &Block, chosen: &[Node]) -> Result<Option<Validator>> {
        let Some((asker_node, operator_nodes)) = chosen.split_first() else {
            return Err(ConsensusError::NotEnoughOperators { found: 0 });
        };
        let previous_price = last.negotiation_price.unwrap_or(0.0);

        let asker_budget = self.negotiation_budget(asker_node.address());
        let formulating = self.rng.gen_bool(0.5);
        let mut asker = Asker::new(asker_node.address(), 0.0, asker_budget, formulating)?;
        let asker_offer = asker.generate_offer((previous_price - self.config.mining_reward).abs());
        asker.set_offer(asker_offer)?;

        let seller = last
            .validator
            .clone()
            .unwrap_or_else(|| MINING_SENDER.to_string());
        let bidder_budget = self.negotiation_budget(&seller);
        let bidder_offer = self.draw_offer(
            self.config.min_gain,
            self.config.max_gain.min(bidder_budget),
        );
        let mut bidder = Bidder::new(seller, bidder_offer, bidder_budget, true)?;

        let mut operators = Vec::with_capacity(operator_nodes.len());
        for node in operator_nodes {
            let budget = self.negotiation_budget(node.address());
            let offer = self.draw_offer(
                self.config.min_operator,
                self.config.max_operator.min(budget),
            );
            operators.push(NegotiationActor::new(node.address(), offer, budget)?);
        }

        let outcome = negotiate(&mut asker, &mut bidder, &mut operators)?;
        info!(
            "Negotiation settled in {:?} regime at price {} (success: {})",
            outcome.regime, outcome.price, outcome.success
        );

        let Some(winner) = outcome.winner else {
            return Ok(None);
        };
        let validator = chosen
            .iter()
            .find(|node| node.address() == winner.identifier())
            .map(|node| Validator {
                node: node.clone(),
                negotiation_price: outcome.price,
                regime: outcome.regime,
            });
        Ok(validator)
    }

    /// Open a round on top of the current last block.
    ///
    /// Seeds the generator from the block's random factor, so every node negotiating on
    /// the same chain draws the same sequence, and enters ourselves as a candidate. The
    /// returned block is the one the round negotiates for.
    pub fn begin_round(&mut self) -> Result<Block> {
        let last = self.last_block().clone();
        self.rng = ChaCha20Rng::seed_from_u64(last.random_factor);

        let me = Node::myself(self.node_id.clone(), self.config.default_reputation)?;
        self.candidates.insert(self.node_id.clone(), me);
        Ok(last)
    }

    /// Elect the validator of the block after `last` and clear the candidate set.
    ///
    /// Precondition and validation failures end the round with `None`.
    pub fn elect_validator(&mut self, last: &Block) -> Result<Option<Validator>> {
        let chosen = self.choose_candidates(last);
        let result = self.run_negotiation(last, &chosen);
        self.candidates.clear();

        match result {
            Ok(validator) => Ok(validator),
            Err(e) if e.is_round_failure() => {
                warn!("Negotiation round failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Finish the round opened by [`Self::begin_round`].
    ///
    /// If we win, the reward is paid to us and the next block is forged. A round whose
    /// last block was replaced meanwhile ends without a winner.
    pub fn settle_round(&mut self, last: &Block) -> Result<MineOutcome> {
        if self.last_block() != last {
            warn!("Chain changed during the round, abandoning it");
            self.candidates.clear();
            return Ok(MineOutcome::NoWinner);
        }

        let Some(winner) = self.elect_validator(last)? else {
            return Ok(MineOutcome::NoWinner);
        };
        if winner.node.address() != self.node_id {
            info!("{} won the right to forge", winner.node.address());
            return Ok(MineOutcome::Lost(winner));
        }

        let reward = Transaction::reward(
            self.node_id.clone(),
            self.config.mining_reward,
            self.clock.now(),
        )?;
        self.submit_transaction(reward)?;

        let block = self.create_block(
            last.hash()?,
            Some(self.node_id.clone()),
            Some(winner.negotiation_price),
        )?;
        Ok(MineOutcome::Forged(block))
    }
}

/// Candidate sets of the neighbours at `urls`; unreachable ones are skipped
pub(crate) async fn fetch_candidates(peers: &dyn PeerClient, urls: &[String]) -> Vec<CandidateOffer> {
    let mut offers = Vec::with_capacity(urls.len());
    for url in urls {
        match peers.candidates(url).await {
            Ok(candidates) => offers.push(CandidateOffer {
                url: url.clone(),
                candidates,
            }),
            Err(e) => warn!("Candidates of {} skipped: {}", url, e),
        }
    }
    offers
}

/// Ask every neighbour to refresh its own candidate set
pub(crate) async fn request_candidate_refresh(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
) {
    for (url, _) in neighbours {
        if let Err(e) = peers.update_candidates(url).await {
            warn!("Candidate refresh not requested from {}: {}", url, e);
        }
    }
}

/// Addresses of the neighbours whose last block was not forged by `validator`.
///
/// Unreachable neighbours are skipped, not counted as dissenting.
pub(crate) async fn dissenting_neighbours(
    peers: &dyn PeerClient,
    neighbours: &[(String, String)],
    validator: &str,
) -> Vec<String> {
    let mut dissenting = Vec::new();
    for (url, address) in neighbours {
        match peers.chain(url).await {
            Ok(chain) => {
                let adopted = chain
                    .last()
                    .and_then(|block| block.validator.as_deref())
                    == Some(validator);
                if !adopted {
                    warn!("{} did not adopt our block", url);
                    dissenting.push(address.clone());
                }
            }
            Err(e) => warn!("Chain of {} not checked: {}", url, e),
        }
    }
    dissenting
}
