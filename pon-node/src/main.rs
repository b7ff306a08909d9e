//! Proof-of-Negotiation Node - ledger daemon running periodic mining rounds

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{resolve_data_dir, NodeConfig};
use pon_consensus::{Blockchain, MineOutcome, NodeService, RsaVerifier, SystemClock};
use pon_network::HttpPeerClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pon-node")]
#[command(about = "Proof-of-Negotiation Node - reputation weighted ledger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init {
        /// Node configuration directory (default ~/.pon-node)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Ledger address of this node, generated when omitted
        #[arg(long)]
        address: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Start the node daemon
    Start {
        /// Node configuration directory (default ~/.pon-node)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Show the effective configuration
    Status {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            data_dir,
            address,
            force,
        } => init_node(resolve_data_dir(data_dir)?, address, force)?,

        Commands::Start { data_dir } => start_node(resolve_data_dir(data_dir)?).await?,

        Commands::Status { data_dir } => show_status(resolve_data_dir(data_dir)?)?,
    }

    Ok(())
}

fn init_node(data_dir: PathBuf, address: Option<String>, force: bool) -> Result<()> {
    info!("Initializing node at {:?}", data_dir);

    if data_dir.join(config::CONFIG_FILE).exists() && !force {
        anyhow::bail!(
            "{} already holds a configuration, use --force to replace it",
            data_dir.display()
        );
    }

    let mut config = NodeConfig::generate();
    if let Some(address) = address {
        config.node_address = address;
    }
    config.validate()?;
    config.save(&data_dir)?;

    info!("✅ Node initialized successfully!");
    info!("📁 Data directory: {:?}", data_dir);
    info!("🆔 Address: {}", config.node_address);

    Ok(())
}

async fn start_node(data_dir: PathBuf) -> Result<()> {
    info!("Starting node from {:?}", data_dir);
    let config = NodeConfig::load(&data_dir)?;

    let peers = HttpPeerClient::from_config(&config.consensus)?;
    let blockchain = Blockchain::new(
        config.node_address.clone(),
        config.consensus.clone(),
        Arc::new(RsaVerifier::new()),
        Arc::new(SystemClock::new()),
    )?;
    let service = NodeService::new(blockchain, Arc::new(peers));

    info!("🆔 Address: {}", config.node_address);
    for peer in &config.peers {
        let status = service.register_node(&peer.url, &peer.address).await;
        if status.success {
            info!("🤝 {}", status.message);
        } else {
            warn!("Could not register {}: {}", peer.url, status.message);
        }
    }

    info!("✅ Node started, mining every {}s", config.mining_interval_secs);
    info!("🎯 Press Ctrl+C to stop");

    let mut rounds = tokio::time::interval(Duration::from_secs(config.mining_interval_secs));
    // the first tick completes immediately
    rounds.tick().await;

    loop {
        tokio::select! {
            _ = rounds.tick() => mine_round(&service).await,
            result = signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    info!("🛑 Shutting down node...");
    Ok(())
}

async fn mine_round(service: &NodeService) {
    match service.mine().await {
        Ok(MineOutcome::Forged(block)) => info!(
            "⛏️  Forged block {} at price {:?}",
            block.block_number, block.negotiation_price
        ),
        Ok(MineOutcome::Lost(validator)) => info!(
            "{} won the round at price {}",
            validator.node.address(),
            validator.negotiation_price
        ),
        Ok(MineOutcome::NoWinner) => info!("Round ended without a validator"),
        Err(e) => error!("Mining round failed: {}", e),
    }
}

fn show_status(data_dir: PathBuf) -> Result<()> {
    let config = NodeConfig::load(&data_dir)?;

    println!("Data directory: {}", data_dir.display());
    println!("Address: {}", config.node_address);
    println!("Mining interval: {}s", config.mining_interval_secs);
    println!("Peers:");
    for peer in &config.peers {
        println!("  {} ({})", peer.url, peer.address);
    }
    println!("Consensus:");
    print!("{}", toml::to_string_pretty(&config.consensus)?);
    Ok(())
}
