//! # Core Domain Entities
//!
//! The chain-level records shared by every crate in the workspace.
//!
//! ## Clusters
//!
//! - **Chain**: [`Block`], [`BlockHeader`], [`SignedBlockHeader`]
//! - **State**: [`Account`], [`ResourceProfile`], [`ProviderProfile`],
//!   [`HeadState`]
//!
//! Hash preimages are hand-encoded field by field (little-endian integers,
//! raw 32-byte arrays) so the fingerprint inputs are bit-identical across
//! implementations; the general-purpose serializer is only used for storage
//! and wire bodies, never for hashing.

use crate::errors::ChainError;
use crate::transactions::Transaction;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{address_of, fingerprint, merkle_root, verify_fingerprint, NodeKeyPair};

/// A 32-byte double-SHA-256 fingerprint.
pub type Hash = [u8; 32];

/// A 32-byte account address: the fingerprint of the owner's public key.
pub type Address = [u8; 32];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// Current block format version.
pub const BLOCK_VERSION: u32 = 1;

/// Unique identifier for a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Short hex form for log fields.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Short hex form of a fingerprint for log fields.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

/// The header of a block, covered by the block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Block format version.
    pub version: u32,
    /// Address of the producer that signed this block.
    pub producer: Address,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Production time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Merkle root over the transaction hashes.
    pub merkle_root: Hash,
}

impl BlockHeader {
    /// The canonical hash preimage: every field in declaration order, the
    /// signature excluded by construction.
    pub fn preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 32 + 32 + 8 + 32);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.producer);
        buf.extend_from_slice(&self.parent_hash);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.merkle_root);
        buf
    }

    /// Compute the block hash: the fingerprint of the preimage.
    pub fn compute_hash(&self) -> Hash {
        fingerprint(&self.preimage())
    }
}

/// A block header together with its declared hash and producer signature.
///
/// The hash is declared on the wire and re-derived during validation; the
/// signature covers the declared hash.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlockHeader {
    /// The covered header.
    pub header: BlockHeader,
    /// Declared hash of the header.
    pub hash: Hash,
    /// Public key of the producer.
    pub signee: PublicKey,
    /// Signature over the declared hash.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl SignedBlockHeader {
    /// Verify declared hash and producer signature.
    ///
    /// The producer address in the header must also be the address derived
    /// from the signing key, otherwise a valid signature from the wrong
    /// identity would pass.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.header.compute_hash() != self.hash {
            return Err(ChainError::InvalidHash);
        }
        if address_of(&self.signee) != self.header.producer {
            return Err(ChainError::InvalidSignature);
        }
        verify_fingerprint(&self.signee, &self.hash, &self.signature)
            .map_err(|_| ChainError::InvalidSignature)
    }
}

/// An immutable block: signed header plus the ordered transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Signed header.
    pub signed_header: SignedBlockHeader,
    /// Transactions in inclusion order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block hash as declared in the signed header.
    pub fn hash(&self) -> Hash {
        self.signed_header.hash
    }

    /// The parent hash.
    pub fn parent_hash(&self) -> Hash {
        self.signed_header.header.parent_hash
    }

    /// The production timestamp (ns since epoch).
    pub fn timestamp(&self) -> i64 {
        self.signed_header.header.timestamp
    }

    /// The producer address.
    pub fn producer(&self) -> Address {
        self.signed_header.header.producer
    }

    /// Hashes of the contained transactions, in order.
    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }

    /// Compute the Merkle root over the contained transactions.
    pub fn compute_merkle_root(&self) -> Hash {
        merkle_root(&self.tx_hashes())
    }

    /// Seal the Merkle root and hash, then sign the hash with `keypair`.
    pub fn pack_and_sign(&mut self, keypair: &NodeKeyPair) {
        self.signed_header.header.merkle_root = self.compute_merkle_root();
        self.signed_header.hash = self.signed_header.header.compute_hash();
        self.signed_header.signee = keypair.public_key();
        self.signed_header.signature = keypair.sign_fingerprint(&self.signed_header.hash);
    }

    /// Full structural verification: Merkle root, declared hash, signature.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.compute_merkle_root() != self.signed_header.header.merkle_root {
            return Err(ChainError::InvalidMerkleTreeRoot);
        }
        self.signed_header.verify()
    }

    /// Build the genesis block: zero parent, zero producer, no transactions.
    ///
    /// Genesis carries no signature; it is trusted by configuration.
    pub fn genesis(timestamp: i64) -> Self {
        let header = BlockHeader {
            version: BLOCK_VERSION,
            producer: [0u8; 32],
            parent_hash: [0u8; 32],
            timestamp,
            merkle_root: [0u8; 32],
        };
        let hash = header.compute_hash();
        Self {
            signed_header: SignedBlockHeader {
                header,
                hash,
                signee: [0u8; 32],
                signature: [0u8; 64],
            },
            transactions: Vec::new(),
        }
    }

    /// True for a genesis-shaped block (zero parent).
    pub fn is_genesis(&self) -> bool {
        self.parent_hash() == [0u8; 32]
    }
}

/// The token kinds an account keeps a balance in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// The transferable base token.
    Native,
    /// Billing credit accrued by resource providers.
    Credit,
}

impl TokenKind {
    /// Number of token kinds.
    pub const COUNT: usize = 2;

    /// Stable index into a per-account balance table.
    pub fn index(self) -> usize {
        match self {
            TokenKind::Native => 0,
            TokenKind::Credit => 1,
        }
    }
}

/// The state of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Account {
    /// Account address.
    pub address: Address,
    /// Highest accepted nonce; the next acceptable nonce is `nonce + 1`.
    pub nonce: u64,
    /// Balance per token kind, indexed by [`TokenKind::index`].
    pub balances: [u64; TokenKind::COUNT],
}

impl Account {
    /// A fresh account with zero nonce and balances.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            nonce: 0,
            balances: [0; TokenKind::COUNT],
        }
    }

    /// Balance in the given token.
    pub fn balance(&self, token: TokenKind) -> u64 {
        self.balances[token.index()]
    }

    /// Credit the balance, saturating at the top of the range.
    pub fn credit(&mut self, token: TokenKind, amount: u64) {
        let slot = &mut self.balances[token.index()];
        *slot = slot.saturating_add(amount);
    }

    /// Debit the balance; balances never go negative.
    pub fn debit(&mut self, token: TokenKind, amount: u64) -> Result<(), ChainError> {
        let slot = &mut self.balances[token.index()];
        *slot = slot
            .checked_sub(amount)
            .ok_or(ChainError::InsufficientBalance {
                required: amount,
                available: *slot,
            })?;
        Ok(())
    }
}

/// A hosted resource (a database chain served by a set of miners).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Resource identifier.
    pub id: Hash,
    /// Owning account.
    pub owner: Address,
    /// Current miner set.
    pub miners: Vec<Address>,
}

/// A registered service provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Provider account.
    pub provider: Address,
    /// Locked deposit in native tokens.
    pub deposit: u64,
    /// The node the provider serves from.
    pub node_id: NodeId,
}

/// The current chain head pointer, persisted with every advancing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HeadState {
    /// Hash of the head block.
    pub head: Hash,
    /// Height of the head block.
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_hash_matches_header() {
        let genesis = Block::genesis(1_000);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.hash(), genesis.signed_header.header.compute_hash());
        assert_eq!(genesis.signed_header.header.merkle_root, [0u8; 32]);
    }

    #[test]
    fn test_pack_and_sign_then_verify() {
        let keypair = NodeKeyPair::generate();
        let mut block = Block {
            signed_header: SignedBlockHeader {
                header: BlockHeader {
                    version: BLOCK_VERSION,
                    producer: keypair.address(),
                    parent_hash: [7u8; 32],
                    timestamp: 42,
                    merkle_root: [0u8; 32],
                },
                hash: [0u8; 32],
                signee: [0u8; 32],
                signature: [0u8; 64],
            },
            transactions: Vec::new(),
        };

        block.pack_and_sign(&keypair);
        assert!(block.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_foreign_producer() {
        let signer = NodeKeyPair::generate();
        let other = NodeKeyPair::generate();
        let mut block = Block::genesis(1);
        // Header claims one identity, the signature comes from another.
        block.signed_header.header.producer = other.address();
        block.pack_and_sign(&signer);
        assert_eq!(block.verify().unwrap_err().code(), "ErrInvalidSignature");
    }

    #[test]
    fn test_verify_rejects_tampered_timestamp() {
        let keypair = NodeKeyPair::generate();
        let mut block = Block::genesis(1);
        block.signed_header.header.producer = keypair.address();
        block.pack_and_sign(&keypair);

        block.signed_header.header.timestamp += 1;
        assert_eq!(block.verify().unwrap_err().code(), "ErrInvalidHash");
    }

    #[test]
    fn test_account_debit_credit() {
        let mut account = Account::new([1u8; 32]);
        account.credit(TokenKind::Native, 100);
        assert_eq!(account.balance(TokenKind::Native), 100);
        assert_eq!(account.balance(TokenKind::Credit), 0);

        account.debit(TokenKind::Native, 30).unwrap();
        assert_eq!(account.balance(TokenKind::Native), 70);

        let err = account.debit(TokenKind::Native, 71).unwrap_err();
        assert_eq!(err.code(), "ErrInsufficientBalance");
        assert_eq!(account.balance(TokenKind::Native), 70);
    }
}
