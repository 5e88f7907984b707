//! # Transactions
//!
//! The tagged transaction kinds accepted by the chain, unique per
//! `(sender, nonce)`. The hash preimage is a fixed-order field encoding with
//! a leading kind tag; variable-length fields carry a `u64` little-endian
//! count prefix. Signatures cover the transaction hash and are excluded from
//! it.

use crate::entities::{Address, Hash, NodeId, PublicKey, Signature, TokenKind};
use crate::errors::ChainError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{address_of, fingerprint, verify_fingerprint, NodeKeyPair};

/// The constant gas price applied to billed gas amounts.
pub const GAS_PRICE: u64 = 1;

/// The fixed set of transaction kinds, each with its own durable pool
/// bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Token transfer between accounts.
    Transfer,
    /// Gas-fee settlement generated by the block producer.
    Billing,
    /// Registration of a service provider.
    ProviderRegistration,
    /// Miner-set update of a hosted resource.
    ResourceUpdate,
}

impl TransactionKind {
    /// All kinds, in tag order.
    pub const ALL: [TransactionKind; 4] = [
        TransactionKind::Transfer,
        TransactionKind::Billing,
        TransactionKind::ProviderRegistration,
        TransactionKind::ResourceUpdate,
    ];

    /// Stable numeric tag, the first field of every hash preimage.
    pub fn tag(self) -> u32 {
        match self {
            TransactionKind::Transfer => 0,
            TransactionKind::Billing => 1,
            TransactionKind::ProviderRegistration => 2,
            TransactionKind::ResourceUpdate => 3,
        }
    }

    /// Stable name, used as the pool bucket suffix.
    pub fn name(self) -> &'static str {
        match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Billing => "billing",
            TransactionKind::ProviderRegistration => "provider-registration",
            TransactionKind::ResourceUpdate => "resource-update",
        }
    }
}

/// Token transfer payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    /// Sending account.
    pub sender: Address,
    /// Sender nonce.
    pub nonce: u64,
    /// Receiving account.
    pub receiver: Address,
    /// Token kind moved.
    pub token: TokenKind,
    /// Amount in base units.
    pub amount: u64,
}

/// Gas-fee settlement payload, generated from a verified billing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPayload {
    /// The block producer account issuing the settlement.
    pub sender: Address,
    /// Sender nonce.
    pub nonce: u64,
    /// Fee receivers, index-aligned with `fees` and `rewards`.
    pub receivers: Vec<Address>,
    /// Fee per receiver (gas × [`GAS_PRICE`]).
    pub fees: Vec<u64>,
    /// Reward per receiver.
    pub rewards: Vec<u64>,
}

/// Provider registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRegistrationPayload {
    /// Registering account.
    pub sender: Address,
    /// Sender nonce.
    pub nonce: u64,
    /// Deposit locked in native tokens.
    pub deposit: u64,
    /// The node the provider serves from.
    pub node_id: NodeId,
}

/// Resource miner-set update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatePayload {
    /// Owning account.
    pub sender: Address,
    /// Sender nonce.
    pub nonce: u64,
    /// Target resource. Creates the resource when previously unknown.
    pub resource_id: Hash,
    /// New miner set.
    pub miners: Vec<Address>,
}

/// A transaction payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPayload {
    /// Token transfer.
    Transfer(TransferPayload),
    /// Gas-fee settlement.
    Billing(BillingPayload),
    /// Provider registration.
    ProviderRegistration(ProviderRegistrationPayload),
    /// Resource miner-set update.
    ResourceUpdate(ResourceUpdatePayload),
}

impl TransactionPayload {
    /// The kind tag of this payload.
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionPayload::Transfer(_) => TransactionKind::Transfer,
            TransactionPayload::Billing(_) => TransactionKind::Billing,
            TransactionPayload::ProviderRegistration(_) => TransactionKind::ProviderRegistration,
            TransactionPayload::ResourceUpdate(_) => TransactionKind::ResourceUpdate,
        }
    }

    /// The sending account.
    pub fn sender(&self) -> Address {
        match self {
            TransactionPayload::Transfer(p) => p.sender,
            TransactionPayload::Billing(p) => p.sender,
            TransactionPayload::ProviderRegistration(p) => p.sender,
            TransactionPayload::ResourceUpdate(p) => p.sender,
        }
    }

    /// The sender nonce.
    pub fn nonce(&self) -> u64 {
        match self {
            TransactionPayload::Transfer(p) => p.nonce,
            TransactionPayload::Billing(p) => p.nonce,
            TransactionPayload::ProviderRegistration(p) => p.nonce,
            TransactionPayload::ResourceUpdate(p) => p.nonce,
        }
    }

    /// The canonical hash preimage: kind tag, sender, nonce, then the
    /// kind-specific fields in declaration order.
    pub fn preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.kind().tag().to_le_bytes());
        buf.extend_from_slice(&self.sender());
        buf.extend_from_slice(&self.nonce().to_le_bytes());
        match self {
            TransactionPayload::Transfer(p) => {
                buf.extend_from_slice(&p.receiver);
                buf.extend_from_slice(&(p.token.index() as u32).to_le_bytes());
                buf.extend_from_slice(&p.amount.to_le_bytes());
            }
            TransactionPayload::Billing(p) => {
                buf.extend_from_slice(&(p.receivers.len() as u64).to_le_bytes());
                for receiver in &p.receivers {
                    buf.extend_from_slice(receiver);
                }
                buf.extend_from_slice(&(p.fees.len() as u64).to_le_bytes());
                for fee in &p.fees {
                    buf.extend_from_slice(&fee.to_le_bytes());
                }
                buf.extend_from_slice(&(p.rewards.len() as u64).to_le_bytes());
                for reward in &p.rewards {
                    buf.extend_from_slice(&reward.to_le_bytes());
                }
            }
            TransactionPayload::ProviderRegistration(p) => {
                buf.extend_from_slice(&p.deposit.to_le_bytes());
                buf.extend_from_slice(&p.node_id.0);
            }
            TransactionPayload::ResourceUpdate(p) => {
                buf.extend_from_slice(&p.resource_id);
                buf.extend_from_slice(&(p.miners.len() as u64).to_le_bytes());
                for miner in &p.miners {
                    buf.extend_from_slice(miner);
                }
            }
        }
        buf
    }
}

/// A signed transaction.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The payload covered by the signature.
    pub payload: TransactionPayload,
    /// Public key of the sender.
    pub signee: PublicKey,
    /// Signature over the transaction hash.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl Transaction {
    /// Sign `payload` with `keypair`.
    pub fn sign(payload: TransactionPayload, keypair: &NodeKeyPair) -> Self {
        let hash = fingerprint(&payload.preimage());
        Self {
            payload,
            signee: keypair.public_key(),
            signature: keypair.sign_fingerprint(&hash),
        }
    }

    /// The transaction hash: the fingerprint of the payload preimage.
    pub fn hash(&self) -> Hash {
        fingerprint(&self.payload.preimage())
    }

    /// The kind of this transaction.
    pub fn kind(&self) -> TransactionKind {
        self.payload.kind()
    }

    /// The sending account.
    pub fn sender(&self) -> Address {
        self.payload.sender()
    }

    /// The sender nonce.
    pub fn nonce(&self) -> u64 {
        self.payload.nonce()
    }

    /// Verify the signature and that the signing key owns the sender
    /// account.
    pub fn verify(&self) -> Result<(), ChainError> {
        if address_of(&self.signee) != self.sender() {
            return Err(ChainError::InvalidSignature);
        }
        verify_fingerprint(&self.signee, &self.hash(), &self.signature)
            .map_err(|_| ChainError::InvalidSignature)
    }
}

/// A gas amount attributed to one account by a billing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasAmount {
    /// The account that consumed the gas.
    pub address: Address,
    /// Gas units consumed.
    pub gas: u64,
}

/// A billing request submitted by the miners of a resource, countersigned by
/// the block producer before settlement.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRequest {
    /// The resource the gas was consumed on.
    pub resource_id: Hash,
    /// Gas per consuming account.
    pub gas_amounts: Vec<GasAmount>,
    /// Public keys of the signers, index-aligned with `signatures`.
    pub signees: Vec<PublicKey>,
    /// Signatures over the request hash.
    #[serde_as(as = "Vec<Bytes>")]
    pub signatures: Vec<Signature>,
}

impl BillingRequest {
    /// Build an unsigned request.
    pub fn new(resource_id: Hash, gas_amounts: Vec<GasAmount>) -> Self {
        Self {
            resource_id,
            gas_amounts,
            signees: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// The request hash over resource id and gas amounts.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(32 + self.gas_amounts.len() * 40);
        buf.extend_from_slice(&self.resource_id);
        buf.extend_from_slice(&(self.gas_amounts.len() as u64).to_le_bytes());
        for entry in &self.gas_amounts {
            buf.extend_from_slice(&entry.address);
            buf.extend_from_slice(&entry.gas.to_le_bytes());
        }
        fingerprint(&buf)
    }

    /// Append a signature from `keypair`.
    pub fn sign_by(&mut self, keypair: &NodeKeyPair) {
        let hash = self.hash();
        self.signees.push(keypair.public_key());
        self.signatures.push(keypair.sign_fingerprint(&hash));
    }

    /// Verify every attached signature against the request hash.
    pub fn verify_signatures(&self) -> Result<(), ChainError> {
        if self.signees.len() != self.signatures.len() {
            return Err(ChainError::InvalidSignature);
        }
        let hash = self.hash();
        for (signee, signature) in self.signees.iter().zip(&self.signatures) {
            verify_fingerprint(signee, &hash, signature)
                .map_err(|_| ChainError::InvalidSignature)?;
        }
        Ok(())
    }
}
