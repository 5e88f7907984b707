//! # Chain Configuration
//!
//! Scheduling parameters, producer set and genesis description for one node.

use serde::{Deserialize, Serialize};
use shared_types::{Address, ChainError, NodeId, TokenKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One block producer in the rotation, identified on the wire by its node id
/// and on-chain by its account address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProducer {
    /// Network identity.
    pub node_id: NodeId,
    /// On-chain account the producer signs blocks with.
    pub address: Address,
}

/// An initial balance written at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Funded account.
    pub address: Address,
    /// Token kind.
    pub token: TokenKind,
    /// Amount in base units.
    pub amount: u64,
}

/// Genesis block description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenesisConfig {
    /// Genesis timestamp, nanoseconds since the Unix epoch. Also the chain
    /// init time the height schedule is anchored to.
    pub timestamp: i64,
    /// Initial balances seeded into the account index.
    pub allocations: Vec<Allocation>,
}

/// Full configuration of one chain node.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Path of the key/value store file. The archive and write-ahead-log
    /// paths derive from it.
    pub data_file: PathBuf,
    /// Wall-clock length of one block slot.
    pub period: Duration,
    /// Main-cycle wake interval, finer than `period`.
    pub tick: Duration,
    /// This node's network identity; must appear in `producers`.
    pub node_id: NodeId,
    /// The full producer rotation, leader of height `h` is
    /// `producers[h % producers.len()]`.
    pub producers: Vec<BlockProducer>,
    /// Genesis description.
    pub genesis: GenesisConfig,
}

impl ChainConfig {
    /// Path of the relational archive file.
    pub fn archive_file(&self) -> PathBuf {
        derived_path(&self.data_file, "archive")
    }

    /// Directory of the replicated-log write-ahead log.
    pub fn wal_dir(&self) -> PathBuf {
        derived_path(&self.data_file, "wal")
    }

    /// The chain init time the height schedule is anchored to.
    pub fn chain_init_time(&self) -> i64 {
        self.genesis.timestamp
    }

    /// Number of producers in the rotation.
    pub fn bp_num(&self) -> u32 {
        self.producers.len() as u32
    }

    /// This node's index in the rotation.
    pub fn index(&self) -> Result<u32, ChainError> {
        self.producers
            .iter()
            .position(|p| p.node_id == self.node_id)
            .map(|i| i as u32)
            .ok_or(ChainError::Config(
                "node id is not in the producer set".into(),
            ))
    }

    /// Validate invariants the rest of the core relies on.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.producers.is_empty() {
            return Err(ChainError::Config("producer set is empty".into()));
        }
        if self.period.is_zero() || self.tick.is_zero() {
            return Err(ChainError::Config("period and tick must be non-zero".into()));
        }
        self.index().map(|_| ())
    }
}

fn derived_path(data_file: &Path, suffix: &str) -> PathBuf {
    let mut name = data_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chain".into());
    name.push('.');
    name.push_str(suffix);
    data_file.with_file_name(name)
}
