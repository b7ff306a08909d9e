//! Configuration of the negotiation and reputation parameters

use crate::constants::{DEFAULT_REPUTATION, MAX_REPUTATION};
use crate::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Whose reputation suffers when a transaction signature fails to verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FalseSignaturePolicy {
    /// Penalize the recipient address
    Recipient,
    /// Penalize the claimed sender address
    Sender,
    /// Reject the transaction without touching reputations
    None,
}

/// Tunable parameters of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Reputation change per unit of gravity
    pub reputation_penalty: f64,

    /// Upper reputation bound
    pub max_reputation: f64,

    /// Reputation assigned to unknown nodes and to our own candidate entry
    pub default_reputation: f64,

    /// Neighbours below this reputation are not asked for candidates
    pub minimum_reputation: f64,

    /// Weighted draws per round are `real_candidates_number + 1`
    pub real_candidates_number: usize,

    /// Reward credited to the validator of a block
    pub mining_reward: f64,

    /// Upper bound of a block `random_factor`
    pub max_seed: u64,

    /// Bounds of the bidder offer
    pub min_gain: f64,
    pub max_gain: f64,

    /// Bounds of the operator offers
    pub min_operator: f64,
    pub max_operator: f64,

    /// Target of the false signature penalty
    pub false_signature_policy: FalseSignaturePolicy,

    /// Timeout of a single peer call in milliseconds
    pub peer_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            reputation_penalty: 0.2,
            max_reputation: MAX_REPUTATION,
            default_reputation: DEFAULT_REPUTATION,
            minimum_reputation: 0.1,
            real_candidates_number: 4,
            mining_reward: 1.0,
            max_seed: 2_000_000,
            min_gain: 0.5,
            max_gain: 2.0,
            min_operator: 0.0,
            max_operator: 1.0,
            false_signature_policy: FalseSignaturePolicy::Recipient,
            peer_timeout_ms: 3000,
        }
    }
}

impl ConsensusConfig {
    /// Load configuration from a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&config_str).map_err(|e| {
                ConsensusError::Config(format!("Failed to parse TOML config: {}", e))
            })?
        } else {
            serde_json::from_str(&config_str).map_err(|e| {
                ConsensusError::Config(format!("Failed to parse JSON config: {}", e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let config_str = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::to_string_pretty(self).map_err(|e| {
                ConsensusError::Config(format!("Failed to serialize config as TOML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self)?
        };

        std::fs::write(path, config_str)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_reputation <= 0.0 || self.max_reputation > MAX_REPUTATION {
            return Err(ConsensusError::Config(format!(
                "max_reputation must be in (0, {}]",
                MAX_REPUTATION
            )));
        }

        if !(0.0..=self.max_reputation).contains(&self.default_reputation) {
            return Err(ConsensusError::Config(format!(
                "default_reputation must be between 0 and {}",
                self.max_reputation
            )));
        }

        if self.reputation_penalty <= 0.0 {
            return Err(ConsensusError::Config(
                "reputation_penalty must be positive".to_string(),
            ));
        }

        // Three operators must survive after the asker is taken out of the draw
        if self.real_candidates_number < 3 {
            return Err(ConsensusError::Config(
                "real_candidates_number must be at least 3".to_string(),
            ));
        }

        if self.mining_reward <= 0.0 {
            return Err(ConsensusError::Config(
                "mining_reward must be positive".to_string(),
            ));
        }

        if self.min_gain < 0.0 || self.min_gain > self.max_gain {
            return Err(ConsensusError::Config(
                "gain bounds must satisfy 0 <= min_gain <= max_gain".to_string(),
            ));
        }

        if self.min_operator < 0.0 || self.min_operator > self.max_operator {
            return Err(ConsensusError::Config(
                "operator bounds must satisfy 0 <= min_operator <= max_operator".to_string(),
            ));
        }

        if self.peer_timeout_ms == 0 {
            return Err(ConsensusError::Config(
                "peer_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
