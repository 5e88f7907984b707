//! # accordd - Accord Ledger Node
//!
//! Boot sequence: configuration, telemetry, keystore, chain, RPC wiring,
//! then run until interrupted.

mod config;

use accord_chain::{Chain, ChainRpc, LoopbackRouter};
use anyhow::{Context, Result};
use clap::Parser;
use config::NodeFile;
use shared_crypto::Keystore;
use shared_types::NodeId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Accord block-producer node.
#[derive(Debug, Parser)]
#[command(name = "accordd", version, about)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, default_value = "accord.toml")]
    config: PathBuf,

    /// Override the data directory from the configuration file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut file = NodeFile::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        file.data_dir = data_dir;
    }

    accord_telemetry::init(&file.telemetry).context("installing the tracing subscriber")?;

    info!(
        config = %cli.config.display(),
        data_dir = %file.data_dir.display(),
        "starting accordd"
    );

    // Node identity: the keystore keypair; the network id defaults to the
    // key's address fingerprint.
    let keystore = Keystore::open(file.keystore_file()).context("opening the keystore")?;
    let keypair = shared_crypto::NodeKeyPair::from_seed(keystore.keypair().to_seed());
    let address = keypair.address();
    let local_id = NodeId(address);

    let chain_config = file.chain_config(local_id, address)?;
    info!(
        node = %chain_config.node_id,
        producers = chain_config.producers.len(),
        period = ?chain_config.period,
        "chain configuration resolved"
    );

    // The peer transport belongs to the hosting deployment; the loopback
    // router serves the standalone single-process setup.
    let router = Arc::new(LoopbackRouter::new());
    let chain = Chain::new(chain_config, keypair, router.clone()).context("opening the chain")?;
    router.register(local_id, Arc::new(chain.clone()) as Arc<dyn ChainRpc>);

    chain.start().await.context("starting the chain")?;
    info!("node is running, interrupt to stop");

    tokio::signal::ctrl_c().await.context("waiting for interrupt")?;

    info!("interrupt received, shutting down");
    chain.stop().await;
    Ok(())
}
