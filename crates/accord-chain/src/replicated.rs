//! # Replicated Log Adapter
//!
//! The chain coordinates client-submitted transactions through a replicated
//! log. The runtime itself is an external collaborator behind the
//! [`ReplicatedLog`] port; committed entries surface through the narrow
//! [`LogHandler`] capability rather than a reference to the whole chain,
//! which keeps the dependency between the chain and the log runtime
//! one-directional.
//!
//! [`WalLog`] is the in-process runtime: entries are appended
//! length-prefixed to a write-ahead log inside the node's WAL directory and
//! applied synchronously in append order.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::ChainError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeouts carried by the log runtime.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Prepare-phase timeout.
    pub prepare_timeout: Duration,
    /// Commit-phase timeout.
    pub commit_timeout: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(1),
            commit_timeout: Duration::from_secs(60),
        }
    }
}

/// The replicated-log runtime port: propose a payload, learn its applied
/// index.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Propose `payload`; resolves once the entry is applied.
    async fn propose(&self, payload: Vec<u8>) -> Result<u64, ChainError>;
}

/// The apply capability the chain hands to the log runtime.
pub trait LogHandler: Send + Sync {
    /// Called for every committed entry, in log order.
    fn on_apply(&self, index: u64, payload: &[u8]);
}

struct WalState {
    file: std::fs::File,
    next_index: u64,
}

/// Local WAL-backed log runtime: durable append, synchronous apply.
pub struct WalLog {
    state: Mutex<WalState>,
    handler: Arc<dyn LogHandler>,
    config: LogConfig,
    path: PathBuf,
}

impl WalLog {
    /// Open the WAL inside `dir`, counting existing entries so indices keep
    /// increasing across restarts. Entries already on disk are not
    /// re-applied; the durable transaction pool is their snapshot.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        handler: Arc<dyn LogHandler>,
        config: LogConfig,
    ) -> Result<Self, ChainError> {
        std::fs::create_dir_all(dir.as_ref())
            .map_err(|e| ChainError::Storage(e.to_string()))?;
        let path = dir.as_ref().join("wal.log");

        let existing = Self::count_entries(&path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ChainError::Storage(e.to_string()))?;

        debug!(path = %path.display(), entries = existing, "opened write-ahead log");
        Ok(Self {
            state: Mutex::new(WalState {
                file,
                next_index: existing,
            }),
            handler,
            config,
            path,
        })
    }

    fn count_entries(path: &Path) -> Result<u64, ChainError> {
        let Ok(mut file) = std::fs::File::open(path) else {
            return Ok(0);
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| ChainError::Storage(e.to_string()))?;

        let mut count = 0u64;
        let mut cursor = 0usize;
        while cursor + 4 <= bytes.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&bytes[cursor..cursor + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                return Err(ChainError::Storage("truncated write-ahead log".into()));
            }
            cursor += len;
            count += 1;
        }
        Ok(count)
    }

    /// Number of entries written so far.
    pub fn len(&self) -> u64 {
        self.state.lock().next_index
    }

    /// True when no entry has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured phase timeouts.
    pub fn config(&self) -> LogConfig {
        self.config
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReplicatedLog for WalLog {
    async fn propose(&self, payload: Vec<u8>) -> Result<u64, ChainError> {
        let index = {
            let mut state = self.state.lock();
            state
                .file
                .write_all(&(payload.len() as u32).to_le_bytes())
                .and_then(|()| state.file.write_all(&payload))
                .and_then(|()| state.file.sync_data())
                .map_err(|e| ChainError::Storage(e.to_string()))?;
            let index = state.next_index;
            state.next_index += 1;
            index
        };

        self.handler.on_apply(index, &payload);
        Ok(index)
    }
}
