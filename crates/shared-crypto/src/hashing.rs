//! # Fingerprint Hashing
//!
//! Every identifier in the chain (block hash, transaction hash, Merkle node,
//! account address) is a 32-byte double-SHA-256 digest. Double hashing keeps
//! the fingerprint outside the reach of length-extension tricks on the inner
//! digest.

use sha2::{Digest, Sha256};

/// A 32-byte fingerprint digest.
pub type Fingerprint = [u8; 32];

/// The all-zero fingerprint, used for genesis parents and empty Merkle trees.
pub const ZERO_FINGERPRINT: Fingerprint = [0u8; 32];

/// Compute the double-SHA-256 fingerprint of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    let first = Sha256::digest(bytes);
    Sha256::digest(first).into()
}

/// Compute the fingerprint of the concatenation of two digests.
///
/// Used for interior Merkle nodes.
pub fn fingerprint_pair(left: &Fingerprint, right: &Fingerprint) -> Fingerprint {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    fingerprint(&buf)
}
