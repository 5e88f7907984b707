//! # Accord Chain - Block Producer Core
//!
//! The replicated block-producing node core. Accepted transactions are
//! serialized into a totally ordered chain of blocks on a fixed
//! leader-rotation schedule; chain and account/resource state persist
//! through `accord-store`; peers cooperate through the advise/fetch RPC
//! surface.
//!
//! ## Modules
//!
//! - [`block_index`]: in-memory DAG of accepted blocks with ancestor queries
//! - [`metastate`]: layered account/resource view and transaction staging
//! - [`runtime`]: wall-clock scheduling, turn ownership, task supervision
//! - [`replicated`]: replicated-log port and the local WAL-backed runtime
//! - [`chain`]: the orchestrator tying validation, production and sync
//!   together
//! - [`rpc`]: peer-facing messages, inbound handler, outbound caller port

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod block_index;
pub mod chain;
pub mod config;
pub mod metastate;
pub mod replicated;
pub mod rpc;
pub mod runtime;

pub use block_index::{BlockIndex, BlockNode};
pub use chain::Chain;
pub use config::{Allocation, BlockProducer, ChainConfig, GenesisConfig};
pub use metastate::MetaState;
pub use replicated::{LogConfig, LogHandler, ReplicatedLog, WalLog};
pub use rpc::{
    AdviseNewBlockReq, AdviseNewBlockResp, ChainRpc, FetchBlockReq, FetchBlockResp,
    LoopbackRouter, PeerCaller,
};
pub use runtime::Runtime;
