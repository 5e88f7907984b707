//! # Node Configuration File
//!
//! TOML-backed configuration for the `accordd` binary. Identities and
//! addresses are hex strings in the file and decoded into the chain
//! configuration at load time. Every section has workable single-node
//! defaults, so a missing file still boots a standalone producer.

use accord_chain::{Allocation, BlockProducer, ChainConfig, GenesisConfig};
use accord_telemetry::TelemetryConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared_types::{NodeId, TokenKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The on-disk configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFile {
    /// Working directory holding the store, archive, WAL and keystore.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Telemetry section.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Chain section.
    #[serde(default)]
    pub chain: ChainSection,
}

impl Default for NodeFile {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            telemetry: TelemetryConfig::default(),
            chain: ChainSection::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Chain scheduling and membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection {
    /// Slot period in seconds.
    pub period_secs: u64,
    /// Main-cycle tick in milliseconds.
    pub tick_millis: u64,
    /// Genesis timestamp, nanoseconds since the Unix epoch. Zero means
    /// "stamp the first boot".
    pub genesis_timestamp: i64,
    /// This node's identity (hex, 32 bytes). Empty means "derive from the
    /// keystore".
    #[serde(default)]
    pub node_id: String,
    /// The producer rotation. Empty means "this node alone".
    #[serde(default)]
    pub producers: Vec<ProducerEntry>,
    /// Genesis allocations.
    #[serde(default)]
    pub allocations: Vec<AllocationEntry>,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            period_secs: 60,
            tick_millis: 1_000,
            genesis_timestamp: 0,
            node_id: String::new(),
            producers: Vec::new(),
            allocations: Vec::new(),
        }
    }
}

/// One producer in the rotation, hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerEntry {
    /// Node identity (hex, 32 bytes).
    pub node_id: String,
    /// Producer account address (hex, 32 bytes).
    pub address: String,
}

/// One genesis allocation, hex-encoded address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Funded address (hex, 32 bytes).
    pub address: String,
    /// Token kind.
    pub token: TokenKind,
    /// Amount in base units.
    pub amount: u64,
}

impl NodeFile {
    /// Load from `path`, or fall back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Path of the keystore file inside the data directory.
    pub fn keystore_file(&self) -> PathBuf {
        self.data_dir.join("node.key")
    }

    /// Resolve into the chain configuration.
    ///
    /// `local_id` and `local_address` come from the keystore and fill the
    /// blanks a single-node file leaves open.
    pub fn chain_config(
        &self,
        local_id: NodeId,
        local_address: shared_types::Address,
    ) -> Result<ChainConfig> {
        let node_id = if self.chain.node_id.is_empty() {
            local_id
        } else {
            NodeId(decode_32(&self.chain.node_id).context("chain.node_id")?)
        };

        let producers = if self.chain.producers.is_empty() {
            vec![BlockProducer {
                node_id,
                address: local_address,
            }]
        } else {
            self.chain
                .producers
                .iter()
                .map(|entry| {
                    Ok(BlockProducer {
                        node_id: NodeId(decode_32(&entry.node_id).context("producer node_id")?),
                        address: decode_32(&entry.address).context("producer address")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let allocations = self
            .chain
            .allocations
            .iter()
            .map(|entry| {
                Ok(Allocation {
                    address: decode_32(&entry.address).context("allocation address")?,
                    token: entry.token,
                    amount: entry.amount,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let timestamp = if self.chain.genesis_timestamp != 0 {
            self.chain.genesis_timestamp
        } else {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)?
                .as_nanos() as i64
        };

        Ok(ChainConfig {
            data_file: self.data_dir.join("chain.db"),
            period: Duration::from_secs(self.chain.period_secs),
            tick: Duration::from_millis(self.chain.tick_millis),
            node_id,
            producers,
            genesis: GenesisConfig {
                timestamp,
                allocations,
            },
        })
    }
}

fn decode_32(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).context("invalid hex")?;
    let Ok(array) = <[u8; 32]>::try_from(bytes) else {
        bail!("expected 32 bytes, got {} hex chars", hex_str.len());
    };
    Ok(array)
}
