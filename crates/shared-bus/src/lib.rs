//! # Shared Bus - In-Process Event Fan-Out
//!
//! Decouples transaction admission from its persistence handler: producers
//! publish onto a topic, subscribers registered for that topic run
//! synchronously in registration order on the publisher's task, so the
//! publisher observes subscriber effects before `publish` returns. Tests
//! register extra observers the same way.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod events;
pub mod publisher;

pub use events::{ChainEvent, EventTopic};
pub use publisher::EventBus;
