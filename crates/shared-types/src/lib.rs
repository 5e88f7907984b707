//! # Shared Types - Core Domain Entities for the Accord Ledger
//!
//! Defines the records every subsystem agrees on:
//!
//! - **Chain**: [`Block`], [`BlockHeader`], [`Transaction`] and its kinds
//! - **State**: [`Account`], [`ResourceProfile`], [`ProviderProfile`],
//!   [`HeadState`]
//! - **Wire**: [`Envelope`] carried on every peer RPC
//! - **Errors**: [`ChainError`] with the stable string codes peers see

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod transactions;

pub use entities::{
    Account, Address, Block, BlockHeader, Hash, HeadState, NodeId, ProviderProfile, PublicKey,
    ResourceProfile, Signature, SignedBlockHeader, TokenKind, BLOCK_VERSION,
};
pub use envelope::Envelope;
pub use errors::ChainError;
pub use transactions::{
    BillingPayload, BillingRequest, GasAmount, ProviderRegistrationPayload, ResourceUpdatePayload,
    Transaction, TransactionKind, TransactionPayload, TransferPayload, GAS_PRICE,
};
