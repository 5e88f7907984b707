//! # RPC Envelope
//!
//! The header carried on every peer-facing request: request id for
//! correlation, origin node id, and an expiry after which the receiver drops
//! the message instead of acting on stale state.

use crate::entities::NodeId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default request lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// The envelope carried on every peer RPC message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for correlating request/response pairs.
    pub request_id: Uuid,
    /// The node that originated the request.
    pub origin: NodeId,
    /// Unix timestamp (seconds) after which the request is stale.
    pub expiry: u64,
}

impl Envelope {
    /// Build an envelope from `origin` with the default lifetime.
    pub fn new(origin: NodeId) -> Self {
        Self::with_ttl(origin, DEFAULT_TTL)
    }

    /// Build an envelope from `origin` expiring after `ttl`.
    pub fn with_ttl(origin: NodeId, ttl: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            request_id: Uuid::new_v4(),
            origin,
            expiry: now + ttl.as_secs(),
        }
    }

    /// True once `now` (Unix seconds) has passed the expiry.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_envelope_not_expired() {
        let envelope = Envelope::new(NodeId([1u8; 32]));
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(!envelope.is_expired(now));
        assert!(envelope.is_expired(envelope.expiry + 1));
    }

    #[test]
    fn test_request_ids_unique() {
        let origin = NodeId([1u8; 32]);
        assert_ne!(
            Envelope::new(origin).request_id,
            Envelope::new(origin).request_id
        );
    }
}
