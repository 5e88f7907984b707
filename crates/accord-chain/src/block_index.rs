//! # Block Index
//!
//! In-memory DAG of every accepted block, keyed by hash. Nodes are owned by
//! the index through `Arc`; the parent link is a non-owning back-reference
//! used for ancestor walks by height and by count. The index is
//! insertion-only during normal operation and acyclic by construction: a
//! non-genesis node can only be added once its parent is present.

use shared_types::{Block, ChainError, Hash};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Map a wall-clock timestamp to its block height slot.
pub fn height_from_time(chain_init_time: i64, period: Duration, timestamp: i64) -> u32 {
    let elapsed = timestamp.saturating_sub(chain_init_time);
    if elapsed < 0 {
        return 0;
    }
    let period_ns = period.as_nanos() as i64;
    if period_ns == 0 {
        return 0;
    }
    (elapsed / period_ns) as u32
}

/// One accepted block in the index.
#[derive(Debug)]
pub struct BlockNode {
    /// The block body.
    pub block: Block,
    /// Block hash, the index key.
    pub hash: Hash,
    /// Wall-clock slot of the block.
    pub height: u32,
    /// Depth in the chain in blocks, independent of empty slots.
    pub count: u32,
    parent: Option<Weak<BlockNode>>,
}

impl BlockNode {
    /// Build a node for `block` under `parent` (none for genesis).
    pub fn new(
        chain_init_time: i64,
        period: Duration,
        block: Block,
        parent: Option<&Arc<BlockNode>>,
    ) -> Arc<Self> {
        let height = height_from_time(chain_init_time, period, block.timestamp());
        let count = parent.map(|p| p.count + 1).unwrap_or(0);
        Arc::new(Self {
            hash: block.hash(),
            height,
            count,
            parent: parent.map(Arc::downgrade),
            block,
        })
    }

    /// The parent node, if still owned by the index.
    pub fn parent(&self) -> Option<Arc<BlockNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Walk parents to the ancestor at wall-clock `height`.
    ///
    /// Heights are sparse (a slot without a block has no node), so the walk
    /// can step past `height`; returns `None` then, and for pruned parents.
    pub fn ancestor_by_height(self: &Arc<Self>, height: u32) -> Option<Arc<BlockNode>> {
        let mut node = Arc::clone(self);
        while node.height > height {
            node = node.parent()?;
        }
        (node.height == height).then_some(node)
    }

    /// Walk parents to the ancestor at chain depth `count`.
    pub fn ancestor_by_count(self: &Arc<Self>, count: u32) -> Option<Arc<BlockNode>> {
        let mut node = Arc::clone(self);
        while node.count > count {
            node = node.parent()?;
        }
        (node.count == count).then_some(node)
    }

    /// The store key of this block: big-endian height then hash, so bucket
    /// scans come back in chain order.
    pub fn index_key(&self) -> Vec<u8> {
        block_key(self.height, &self.hash)
    }
}

/// The store key of a block at `height` with `hash`.
pub fn block_key(height: u32, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 32);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// The in-memory DAG of accepted blocks.
#[derive(Default)]
pub struct BlockIndex {
    nodes: HashMap<Hash, Arc<BlockNode>>,
}

impl BlockIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node`.
    ///
    /// Fails on a duplicate hash, and for a non-genesis node whose parent is
    /// not already present (which keeps the graph acyclic).
    pub fn add(&mut self, node: Arc<BlockNode>) -> Result<(), ChainError> {
        if self.nodes.contains_key(&node.hash) {
            return Err(ChainError::DuplicateBlock(node.hash));
        }
        match node.parent() {
            Some(parent) => {
                if !self.nodes.contains_key(&parent.hash) {
                    return Err(ChainError::ParentNotFound);
                }
            }
            None => {
                if !node.block.is_genesis() {
                    return Err(ChainError::ParentNotFound);
                }
            }
        }
        self.nodes.insert(node.hash, node);
        Ok(())
    }

    /// Look up a node by hash.
    pub fn lookup(&self, hash: &Hash) -> Option<Arc<BlockNode>> {
        self.nodes.get(hash).cloned()
    }

    /// True if `hash` is indexed.
    pub fn has_block(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::NodeKeyPair;
    use shared_types::{Block, BlockHeader, SignedBlockHeader, BLOCK_VERSION};

    const PERIOD: Duration = Duration::from_secs(60);

    fn block_at(parent: &Arc<BlockNode>, keypair: &NodeKeyPair, timestamp: i64) -> Block {
        let mut block = Block {
            signed_header: SignedBlockHeader {
                header: BlockHeader {
                    version: BLOCK_VERSION,
                    producer: keypair.address(),
                    parent_hash: parent.hash,
                    timestamp,
                    merkle_root: [0u8; 32],
                },
                hash: [0u8; 32],
                signee: [0u8; 32],
                signature: [0u8; 64],
            },
            transactions: Vec::new(),
        };
        block.pack_and_sign(keypair);
        block
    }

    /// Builds genesis at t=0 plus blocks in slots 1, 2 and 5 (slots 3 and 4
    /// stay empty).
    fn sample_chain() -> (BlockIndex, Arc<BlockNode>) {
        let keypair = NodeKeyPair::generate();
        let mut index = BlockIndex::new();

        let genesis = BlockNode::new(0, PERIOD, Block::genesis(0), None);
        index.add(Arc::clone(&genesis)).unwrap();

        let mut tip = genesis;
        for slot in [1u32, 2, 5] {
            let timestamp = slot as i64 * PERIOD.as_nanos() as i64;
            let block = block_at(&tip, &keypair, timestamp);
            let node = BlockNode::new(0, PERIOD, block, Some(&tip));
            index.add(Arc::clone(&node)).unwrap();
            tip = node;
        }
        (index, tip)
    }

    #[test]
    fn test_height_from_time() {
        let period = Duration::from_secs(60);
        assert_eq!(height_from_time(0, period, 0), 0);
        assert_eq!(height_from_time(0, period, 59_999_999_999), 0);
        assert_eq!(height_from_time(0, period, 60_000_000_000), 1);
        assert_eq!(height_from_time(100, period, 50), 0);
    }

    #[test]
    fn test_heights_and_counts() {
        let (_index, tip) = sample_chain();
        assert_eq!(tip.height, 5);
        assert_eq!(tip.count, 3);
    }

    #[test]
    fn test_ancestor_by_height() {
        let (_index, tip) = sample_chain();
        assert_eq!(tip.ancestor_by_height(2).unwrap().height, 2);
        assert_eq!(tip.ancestor_by_height(0).unwrap().count, 0);
        // Slot 3 has no block.
        assert!(tip.ancestor_by_height(3).is_none());
        // Heights above the tip are unknown.
        assert!(tip.ancestor_by_height(6).is_none());
    }

    #[test]
    fn test_ancestor_by_count() {
        let (_index, tip) = sample_chain();
        for count in 0..=3u32 {
            assert_eq!(tip.ancestor_by_count(count).unwrap().count, count);
        }
        assert!(tip.ancestor_by_count(4).is_none());
    }

    #[test]
    fn test_walk_reaches_genesis_in_count_steps() {
        let (_index, tip) = sample_chain();
        let mut node = Arc::clone(&tip);
        let mut steps = 0;
        while let Some(parent) = node.parent() {
            node = parent;
            steps += 1;
        }
        assert_eq!(steps, tip.count);
        assert!(node.block.is_genesis());
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let (mut index, tip) = sample_chain();
        let err = index.add(Arc::clone(&tip)).unwrap_err();
        assert_eq!(err.code(), "ErrDuplicateBlock");
    }

    #[test]
    fn test_orphan_add_rejected() {
        let keypair = NodeKeyPair::generate();
        let mut index = BlockIndex::new();
        let genesis = BlockNode::new(0, PERIOD, Block::genesis(0), None);

        // Parent node was never added to the index.
        let orphan_block = block_at(&genesis, &keypair, PERIOD.as_nanos() as i64);
        let orphan = BlockNode::new(0, PERIOD, orphan_block, Some(&genesis));
        assert_eq!(index.add(orphan).unwrap_err().code(), "ErrParentNotFound");
    }

    #[test]
    fn test_block_key_orders_by_height() {
        let low = block_key(1, &[0xFF; 32]);
        let high = block_key(256, &[0x00; 32]);
        assert!(low < high);
    }
}
