//! Negotiation engine
//!
//! A round is played by one [`Asker`], one [`Bidder`] (the seller of the validation
//! right) and at least three generic operators. The offers of the operators relative to
//! the asker/bidder midpoints select one of six pricing [`Regime`]s; the regime fixes the
//! negotiation price and how the winner pays the bidder.
//!
//! Every actor keeps `0 <= offer <= balance` at all times. Setters and transfers that
//! would break it fail with [`ConsensusError::Validation`] and leave the actor unchanged.

use crate::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Minimum number of operators a negotiation needs
pub const MIN_OPERATORS: usize = 3;

/// A participant holding an offer backed by a balance
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationActor {
    identifier: String,
    offer: f64,
    balance: f64,
}

impl NegotiationActor {
    pub fn new(identifier: impl Into<String>, offer: f64, balance: f64) -> Result<Self> {
        check_amount("offer", offer)?;
        check_amount("balance", balance)?;
        if offer > balance {
            return Err(ConsensusError::Validation(format!(
                "Offer {} cannot exceed balance {}",
                offer, balance
            )));
        }

        Ok(Self {
            identifier: identifier.into(),
            offer,
            balance,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn offer(&self) -> f64 {
        self.offer
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn set_offer(&mut self, offer: f64) -> Result<()> {
        check_amount("offer", offer)?;
        if offer > self.balance {
            return Err(ConsensusError::Validation(format!(
                "Offer {} cannot exceed balance {}",
                offer, self.balance
            )));
        }
        self.offer = offer;
        Ok(())
    }

    pub fn set_balance(&mut self, balance: f64) -> Result<()> {
        check_amount("balance", balance)?;
        if balance < self.offer {
            return Err(ConsensusError::Validation(format!(
                "Balance {} cannot be smaller than offer {}",
                balance, self.offer
            )));
        }
        self.balance = balance;
        Ok(())
    }
}

fn check_amount(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConsensusError::Validation(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}

/// The actor that may formulate the actual price proposal
#[derive(Debug, Clone, PartialEq)]
pub struct Asker {
    actor: NegotiationActor,
    pub formulating: bool,
}

impl Asker {
    pub fn new(identifier: impl Into<String>, offer: f64, balance: f64, formulating: bool) -> Result<Self> {
        Ok(Self {
            actor: NegotiationActor::new(identifier, offer, balance)?,
            formulating,
        })
    }

    /// Offer the whole balance, but never less than `minimum`
    pub fn generate_offer(&self, minimum: f64) -> f64 {
        self.actor.balance.max(minimum)
    }
}

impl Deref for Asker {
    type Target = NegotiationActor;

    fn deref(&self) -> &NegotiationActor {
        &self.actor
    }
}

impl DerefMut for Asker {
    fn deref_mut(&mut self) -> &mut NegotiationActor {
        &mut self.actor
    }
}

/// The seller of the validation right
#[derive(Debug, Clone, PartialEq)]
pub struct Bidder {
    actor: NegotiationActor,
    pub acceptance: bool,
}

impl Bidder {
    pub fn new(identifier: impl Into<String>, offer: f64, balance: f64, acceptance: bool) -> Result<Self> {
        Ok(Self {
            actor: NegotiationActor::new(identifier, offer, balance)?,
            acceptance,
        })
    }
}

impl Deref for Bidder {
    type Target = NegotiationActor;

    fn deref(&self) -> &NegotiationActor {
        &self.actor
    }
}

impl DerefMut for Bidder {
    fn deref_mut(&mut self) -> &mut NegotiationActor {
        &mut self.actor
    }
}

/// Move `amount` from `payer` to `payee`.
///
/// The payer's offer is capped to what is left of its balance, so the
/// offer/balance invariant survives the payment.
pub fn transfer(payer: &mut NegotiationActor, payee: &mut NegotiationActor, amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ConsensusError::Validation(format!(
            "Transfer amount must be positive, got {}",
            amount
        )));
    }
    if payer.balance - amount < 0.0 {
        return Err(ConsensusError::Validation(format!(
            "Transfer of {} would leave {} with a negative balance",
            amount, payer.identifier
        )));
    }

    payer.balance -= amount;
    payer.offer = payer.offer.min(payer.balance);
    payee.balance += amount;
    Ok(())
}

/// Relative weights of the bidder, operator and asker terms of a price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub bidder: f64,
    pub operator: f64,
    pub asker: f64,
}

/// Midpoints of the asker and bidder offers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Means {
    pub mean: f64,
    pub low: f64,
    pub up: f64,
}

impl Means {
    pub fn new(asker_offer: f64, bidder_offer: f64) -> Self {
        let mean = (asker_offer + bidder_offer) / 2.0;
        Self {
            mean,
            low: (asker_offer + mean) / 2.0,
            up: (bidder_offer + mean) / 2.0,
        }
    }
}

/// Pricing regime of a negotiation, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    LowAttractor,
    HighAttractor,
    CentralAttractor,
    LowConcentration,
    HighConcentration,
    Equilibrium,
}

impl Regime {
    pub const ALL: [Regime; 6] = [
        Regime::LowAttractor,
        Regime::HighAttractor,
        Regime::CentralAttractor,
        Regime::LowConcentration,
        Regime::HighConcentration,
        Regime::Equilibrium,
    ];

    pub fn weights(self) -> Weights {
        let (bidder, operator, asker) = match self {
            Regime::LowAttractor => (0.5, 0.25, 0.25),
            Regime::HighAttractor => (0.25, 0.5, 0.25),
            Regime::CentralAttractor => (0.1, 0.8, 0.1),
            Regime::LowConcentration | Regime::HighConcentration => (0.25, 0.5, 0.25),
            Regime::Equilibrium => (0.3, 0.4, 0.3),
        };
        Weights {
            bidder,
            operator,
            asker,
        }
    }

    /// Whether the regime's own predicate holds, ignoring priority.
    /// `Equilibrium` holds only when no other predicate does.
    pub fn holds(self, means: &Means, operator_offers: &[f64]) -> bool {
        let quorum = concentration_quorum(operator_offers.len());
        match self {
            Regime::LowAttractor => operator_offers.iter().all(|&o| o <= means.low),
            Regime::HighAttractor => operator_offers.iter().all(|&o| o >= means.up),
            Regime::CentralAttractor => operator_offers
                .iter()
                .all(|&o| means.low < o && o < means.up),
            Regime::LowConcentration => {
                operator_offers.iter().filter(|&&o| o <= means.up).count() >= quorum
            }
            Regime::HighConcentration => {
                operator_offers.iter().filter(|&&o| o >= means.low).count() >= quorum
            }
            Regime::Equilibrium => Regime::ALL[..5]
                .iter()
                .all(|regime| !regime.holds(means, operator_offers)),
        }
    }

    /// First regime, in priority order, whose predicate holds
    pub fn classify(means: &Means, operator_offers: &[f64]) -> Regime {
        Regime::ALL[..5]
            .iter()
            .copied()
            .find(|regime| regime.holds(means, operator_offers))
            .unwrap_or(Regime::Equilibrium)
    }

    /// Negotiation price of the regime
    pub fn price(self, asker_offer: f64, bidder_offer: f64, operator_offers: &[f64]) -> f64 {
        let means = Means::new(asker_offer, bidder_offer);
        let operator_term = match self {
            Regime::LowAttractor => means.low,
            Regime::HighAttractor => means.up,
            Regime::CentralAttractor => operator_offers.iter().copied().fold(0.0, f64::max),
            Regime::LowConcentration => (2.0 * asker_offer + bidder_offer) / 3.0,
            Regime::HighConcentration => (asker_offer + 2.0 * bidder_offer) / 3.0,
            Regime::Equilibrium => means.mean,
        };
        let w = self.weights();
        w.bidder * bidder_offer + w.operator * operator_term + w.asker * asker_offer
    }
}

/// Operators needed at or beyond a midpoint for a concentration regime: two thirds, rounded
fn concentration_quorum(operators: usize) -> usize {
    (2.0 * operators as f64 / 3.0).round() as usize
}

/// Who bought the validation right
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Winner {
    /// The formulating asker paid the negotiation price; no operator wins
    Asker(String),
    /// An operator outbid the others
    Operator(String),
}

impl Winner {
    pub fn identifier(&self) -> &str {
        match self {
            Winner::Asker(id) | Winner::Operator(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationOutcome {
    pub regime: Regime,
    pub price: f64,
    /// False when the bidder refused the deal
    pub success: bool,
    pub winner: Option<Winner>,
}

/// Run one negotiation, settling the payment between the winner and the bidder.
pub fn negotiate(
    asker: &mut Asker,
    bidder: &mut Bidder,
    operators: &mut [NegotiationActor],
) -> Result<NegotiationOutcome> {
    if operators.len() < MIN_OPERATORS {
        return Err(ConsensusError::NotEnoughOperators {
            found: operators.len(),
        });
    }

    let offers: Vec<f64> = operators.iter().map(NegotiationActor::offer).collect();
    let means = Means::new(asker.offer(), bidder.offer());
    let regime = Regime::classify(&means, &offers);
    let price = regime.price(asker.offer(), bidder.offer(), &offers);

    let mut outcome = NegotiationOutcome {
        regime,
        price,
        success: false,
        winner: None,
    };

    if !bidder.acceptance {
        return Ok(outcome);
    }

    if asker.formulating {
        asker.set_offer(price)?;
        transfer(asker, bidder, price)?;
        outcome.success = true;
        outcome.winner = Some(Winner::Asker(asker.identifier().to_string()));
        return Ok(outcome);
    }

    let closest = closest_operator(operators, price);
    let operator = &mut operators[closest];
    let amount = match regime {
        Regime::LowAttractor | Regime::HighAttractor | Regime::CentralAttractor => operator.offer(),
        Regime::LowConcentration | Regime::HighConcentration => {
            operator.set_offer(price)?;
            price
        }
        Regime::Equilibrium => price,
    };
    transfer(operator, bidder, amount)?;

    outcome.success = true;
    outcome.winner = Some(Winner::Operator(operator.identifier().to_string()));
    Ok(outcome)
}

/// Index of the operator whose offer is nearest to `price`; the first one wins ties
fn closest_operator(operators: &[NegotiationActor], price: f64) -> usize {
    operators
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, best_gap), (i, op)| {
            let gap = (op.offer() - price).abs();
            if gap < best_gap {
                (i, gap)
            } else {
                (best, best_gap)
            }
        })
        .0
}
