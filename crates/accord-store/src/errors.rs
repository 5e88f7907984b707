//! Store error types.

use shared_types::ChainError;
use thiserror::Error;

/// Errors surfaced by the durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file content is malformed.
    #[error("corrupt store file: {0}")]
    Corrupt(String),

    /// Archive database failure.
    #[error("archive error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Storage(err.to_string())
    }
}
