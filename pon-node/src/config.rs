//! On-disk node configuration

use anyhow::{bail, Context, Result};
use pon_consensus::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CONFIG_FILE: &str = "config.toml";

/// A neighbour registered at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub url: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Our ledger address
    pub node_address: String,

    /// Seconds between two mining rounds
    pub mining_interval_secs: u64,

    #[serde(default)]
    pub peers: Vec<PeerEntry>,

    #[serde(default)]
    pub consensus: ConsensusConfig,
}

impl NodeConfig {
    /// Fresh configuration with a random placeholder address
    pub fn generate() -> Self {
        Self {
            node_address: format!("node-{}", Uuid::new_v4().simple()),
            mining_interval_secs: 30,
            peers: Vec::new(),
            consensus: ConsensusConfig::default(),
        }
    }

    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: NodeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(CONFIG_FILE);
        std::fs::write(&path, toml::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_address.trim().is_empty() {
            bail!("node_address must not be empty");
        }
        if self.mining_interval_secs == 0 {
            bail!("mining_interval_secs must be positive");
        }
        self.consensus.validate()?;
        Ok(())
    }
}

/// `--data-dir` if given, `~/.pon-node` otherwise
pub fn resolve_data_dir(data_dir: Option<PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(dir) => Ok(dir),
        None => dirs::home_dir()
            .map(|home| home.join(".pon-node"))
            .context("Cannot locate the home directory, pass --data-dir"),
    }
}
