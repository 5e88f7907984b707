//! # Event Publisher
//!
//! The bus keeps subscriber callbacks per topic and delivers synchronously:
//! the handler list is snapshotted under the lock, then invoked in
//! registration order with the lock released so a handler may itself
//! subscribe or publish.

use crate::events::{ChainEvent, EventTopic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type Handler = Arc<dyn Fn(&ChainEvent) + Send + Sync>;

/// In-process event bus with synchronous delivery.
#[derive(Default)]
pub struct EventBus {
    /// Subscriber callbacks per topic, in registration order.
    subscribers: RwLock<HashMap<EventTopic, Vec<Handler>>>,
    /// Total events published.
    events_published: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Handlers run in registration order.
    pub fn subscribe<F>(&self, topic: EventTopic, handler: F)
    where
        F: Fn(&ChainEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(topic)
            .or_default()
            .push(Arc::new(handler));
        debug!(?topic, "new subscription registered");
    }

    /// Publish `event` to every subscriber of its topic.
    ///
    /// Returns the number of handlers that ran. An event with no
    /// subscribers is counted but dropped.
    pub fn publish(&self, event: &ChainEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .get(&event.topic())
            .map(|list| list.to_vec())
            .unwrap_or_default();

        for handler in &handlers {
            handler(event);
        }

        debug!(topic = ?event.topic(), receivers = handlers.len(), "event published");
        handlers.len()
    }

    /// Number of subscribers registered for `topic`.
    pub fn subscriber_count(&self, topic: EventTopic) -> usize {
        self.subscribers
            .read()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total events published since creation.
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
