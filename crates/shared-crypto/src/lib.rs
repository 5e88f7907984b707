//! # Shared Crypto - Primitives for the Accord Ledger
//!
//! Thin, audited-wrapper style interfaces over the cryptographic crates the
//! rest of the workspace consumes:
//!
//! - [`hashing`]: the 32-byte double-SHA-256 fingerprint used for block
//!   hashes, transaction hashes and Merkle nodes
//! - [`signatures`]: producer identities and fingerprint-digest signing
//! - [`merkle`]: binary Merkle tree over transaction fingerprints
//! - [`keystore`]: file-backed node identity keys

pub mod errors;
pub mod hashing;
pub mod keystore;
pub mod merkle;
pub mod signatures;

pub use errors::CryptoError;
pub use hashing::{fingerprint, Fingerprint, ZERO_FINGERPRINT};
pub use keystore::Keystore;
pub use merkle::merkle_root;
pub use signatures::{address_of, verify_fingerprint, NodeKeyPair, PublicKeyBytes, SignatureBytes};
