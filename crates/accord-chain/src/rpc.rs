//! # Peer RPC Surface
//!
//! The advise/fetch protocol between block producers. Message bodies are the
//! canonical wire form; transport and framing belong to the RPC layer
//! outside this crate, reached through the [`PeerCaller`] outbound port.
//! [`LoopbackRouter`] is the in-memory adapter used by tests and
//! single-process multi-node setups.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_types::{Block, ChainError, Envelope, NodeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Notification of a newly produced block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviseNewBlockReq {
    /// Request envelope.
    pub envelope: Envelope,
    /// The produced block.
    pub block: Block,
}

/// Acknowledgement of an advise; carries nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdviseNewBlockResp {}

/// Request for the block at a height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBlockReq {
    /// Request envelope.
    pub envelope: Envelope,
    /// Requested height.
    pub height: u32,
}

/// Response carrying the block, when the peer has one at that height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBlockResp {
    /// The requested block.
    pub block: Option<Block>,
}

/// Inbound handler: what a node answers peers with.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Accept an advised block; enqueues and returns immediately.
    async fn advise_new_block(
        &self,
        req: AdviseNewBlockReq,
    ) -> Result<AdviseNewBlockResp, ChainError>;

    /// Serve the block at the requested height.
    async fn fetch_block(&self, req: FetchBlockReq) -> Result<FetchBlockResp, ChainError>;
}

/// Outbound caller port: how a node reaches its peers.
#[async_trait]
pub trait PeerCaller: Send + Sync {
    /// Advise `target` of a new block.
    async fn advise_new_block(
        &self,
        target: NodeId,
        req: AdviseNewBlockReq,
    ) -> Result<AdviseNewBlockResp, ChainError>;

    /// Fetch a block from `target`.
    async fn fetch_block(
        &self,
        target: NodeId,
        req: FetchBlockReq,
    ) -> Result<FetchBlockResp, ChainError>;
}

/// In-memory request router dispatching to registered in-process handlers.
#[derive(Default)]
pub struct LoopbackRouter {
    handlers: RwLock<HashMap<NodeId, Arc<dyn ChainRpc>>>,
}

impl LoopbackRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler serving `node`.
    pub fn register(&self, node: NodeId, handler: Arc<dyn ChainRpc>) {
        self.handlers.write().insert(node, handler);
    }

    /// Remove a handler, simulating an unreachable peer.
    pub fn unregister(&self, node: &NodeId) {
        self.handlers.write().remove(node);
    }

    fn handler(&self, node: &NodeId) -> Result<Arc<dyn ChainRpc>, ChainError> {
        self.handlers
            .read()
            .get(node)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("peer {} unreachable", node.short_hex())))
    }
}

#[async_trait]
impl PeerCaller for LoopbackRouter {
    async fn advise_new_block(
        &self,
        target: NodeId,
        req: AdviseNewBlockReq,
    ) -> Result<AdviseNewBlockResp, ChainError> {
        let handler = self.handler(&target)?;
        handler.advise_new_block(req).await
    }

    async fn fetch_block(
        &self,
        target: NodeId,
        req: FetchBlockReq,
    ) -> Result<FetchBlockResp, ChainError> {
        let handler = self.handler(&target)?;
        handler.fetch_block(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        advises: AtomicU32,
    }

    #[async_trait]
    impl ChainRpc for CountingHandler {
        async fn advise_new_block(
            &self,
            _req: AdviseNewBlockReq,
        ) -> Result<AdviseNewBlockResp, ChainError> {
            self.advises.fetch_add(1, Ordering::SeqCst);
            Ok(AdviseNewBlockResp {})
        }

        async fn fetch_block(&self, req: FetchBlockReq) -> Result<FetchBlockResp, ChainError> {
            if req.height == 0 {
                Ok(FetchBlockResp {
                    block: Some(Block::genesis(0)),
                })
            } else {
                Err(ChainError::NoSuchBlock)
            }
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(NodeId([0u8; 32]))
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let router = LoopbackRouter::new();
        let handler = Arc::new(CountingHandler::default());
        let node = NodeId([1u8; 32]);
        router.register(node, handler.clone());

        router
            .advise_new_block(
                node,
                AdviseNewBlockReq {
                    envelope: envelope(),
                    block: Block::genesis(0),
                },
            )
            .await
            .unwrap();
        assert_eq!(handler.advises.load(Ordering::SeqCst), 1);

        let resp = router
            .fetch_block(
                node,
                FetchBlockReq {
                    envelope: envelope(),
                    height: 0,
                },
            )
            .await
            .unwrap();
        assert!(resp.block.is_some());
    }

    #[tokio::test]
    async fn test_unknown_peer_is_rpc_error() {
        let router = LoopbackRouter::new();
        let err = router
            .fetch_block(
                NodeId([7u8; 32]),
                FetchBlockReq {
                    envelope: envelope(),
                    height: 1,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ErrRpc");
    }

    #[tokio::test]
    async fn test_missing_height_propagates_code() {
        let router = LoopbackRouter::new();
        let node = NodeId([1u8; 32]);
        router.register(node, Arc::new(CountingHandler::default()));

        let err = router
            .fetch_block(
                node,
                FetchBlockReq {
                    envelope: envelope(),
                    height: 5,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ErrNoSuchBlock");
    }
}
