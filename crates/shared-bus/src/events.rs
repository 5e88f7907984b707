//! Event and topic definitions for the bus.

use shared_types::{Hash, Transaction};

/// Routing topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// Transaction admission events.
    Transactions,
    /// Block acceptance events.
    Blocks,
}

/// Events exchanged between the chain's in-process subsystems.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A transaction arrived on the pending channel and awaits staging.
    TransactionReceived(Transaction),
    /// A block was accepted and the head advanced.
    BlockAccepted {
        /// Height of the accepted block.
        height: u32,
        /// Hash of the accepted block.
        hash: Hash,
    },
}

impl ChainEvent {
    /// The topic this event is routed on.
    pub fn topic(&self) -> EventTopic {
        match self {
            ChainEvent::TransactionReceived(_) => EventTopic::Transactions,
            ChainEvent::BlockAccepted { .. } => EventTopic::Blocks,
        }
    }
}
