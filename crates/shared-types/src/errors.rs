//! # Chain Error Taxonomy
//!
//! One enum for everything the chain surfaces, each variant carrying a
//! stable string code peers can match on. Validation and state errors are
//! terminal for the offending block or transaction; ordering errors leave
//! the input queued or stashed; storage and RPC variants wrap the source
//! message and abort the in-flight operation only.

use crate::entities::Address;
use thiserror::Error;

/// Errors surfaced by the chain core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The block's parent hash does not match the current head.
    #[error("block parent does not match the current head")]
    ParentNotMatch,

    /// The block references a parent that is not in the index.
    #[error("block parent not found in the index")]
    ParentNotFound,

    /// The declared Merkle root does not cover the transaction list.
    #[error("invalid merkle tree root")]
    InvalidMerkleTreeRoot,

    /// The declared block hash does not match the header encoding.
    #[error("invalid block hash")]
    InvalidHash,

    /// A producer or sender signature failed verification.
    #[error("invalid signature")]
    InvalidSignature,

    /// The block's producer is not the leader of its height.
    #[error("producer is not the leader of height {height}")]
    NotLeader {
        /// Height of the offending block.
        height: u32,
    },

    /// No block is known at the requested position.
    #[error("no such block")]
    NoSuchBlock,

    /// The persisted head state is missing from the store.
    #[error("meta state not found in store")]
    MetaStateNotFound,

    /// The nonce is not the next acceptable one for its sender.
    #[error("duplicate nonce {actual}, next acceptable is {expected}")]
    DuplicateNonce {
        /// Next acceptable nonce.
        expected: u64,
        /// Nonce carried by the transaction.
        actual: u64,
    },

    /// A debit would push a balance below zero.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount the operation needs.
        required: u64,
        /// Amount the account holds.
        available: u64,
    },

    /// The transaction targets an account that does not exist.
    #[error("unknown account {}", hex::encode(.0))]
    UnknownAccount(Address),

    /// A block with this hash is already present in the index.
    #[error("duplicate block {}", hex::encode(.0))]
    DuplicateBlock(crate::entities::Hash),

    /// The node configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Durable store failure; the enclosing batch was aborted.
    #[error("storage error: {0}")]
    Storage(String),

    /// Canonical encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A peer call failed.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// The stable string code surfaced to peers.
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::ParentNotMatch => "ErrParentNotMatch",
            ChainError::ParentNotFound => "ErrParentNotFound",
            ChainError::InvalidMerkleTreeRoot => "ErrInvalidMerkleTreeRoot",
            ChainError::InvalidHash => "ErrInvalidHash",
            ChainError::InvalidSignature => "ErrInvalidSignature",
            ChainError::NotLeader { .. } => "ErrNotLeader",
            ChainError::NoSuchBlock => "ErrNoSuchBlock",
            ChainError::MetaStateNotFound => "ErrMetaStateNotFound",
            ChainError::DuplicateNonce { .. } => "ErrDuplicateNonce",
            ChainError::InsufficientBalance { .. } => "ErrInsufficientBalance",
            ChainError::UnknownAccount(_) => "ErrUnknownAccount",
            ChainError::DuplicateBlock(_) => "ErrDuplicateBlock",
            ChainError::Config(_) => "ErrConfig",
            ChainError::Storage(_) => "ErrStorage",
            ChainError::Serialization(_) => "ErrSerialization",
            ChainError::Rpc(_) => "ErrRpc",
        }
    }

    /// True for failures worth retrying later (ordering or transport), as
    /// opposed to terminal validation and state errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::ParentNotMatch
                | ChainError::ParentNotFound
                | ChainError::NoSuchBlock
                | ChainError::Rpc(_)
        )
    }
}
