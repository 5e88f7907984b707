//! # Accord Store - Durable Persistence
//!
//! Two backing files per node:
//!
//! - [`Store`]: the authoritative key/value file with named buckets (block
//!   bodies, per-kind transaction pool, account/resource/provider indices,
//!   head-state pointer). All mutation goes through transactional batches
//!   with all-or-nothing semantics.
//! - [`ChainArchive`]: a derivative SQLite file recording block headers and
//!   pool snapshots for ad-hoc indexing; losing it loses no chain state.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod archive;
pub mod errors;
pub mod kv;

pub use archive::ChainArchive;
pub use errors::StoreError;
pub use kv::{Batch, Bucket, Store, HEAD_STATE_KEY};
