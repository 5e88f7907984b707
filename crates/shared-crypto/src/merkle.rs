//! # Merkle Tree
//!
//! Binary Merkle tree over transaction fingerprints. An odd node at any
//! level is promoted unchanged; the empty tree has the all-zero root so an
//! empty block commits to a well-known value.

use crate::hashing::{fingerprint_pair, Fingerprint, ZERO_FINGERPRINT};

/// Compute the Merkle root of a list of leaf fingerprints.
pub fn merkle_root(leaves: &[Fingerprint]) -> Fingerprint {
    if leaves.is_empty() {
        return ZERO_FINGERPRINT;
    }

    let mut level: Vec<Fingerprint> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            if chunk.len() == 2 {
                next.push(fingerprint_pair(&chunk[0], &chunk[1]));
            } else {
                next.push(chunk[0]);
            }
        }
        level = next;
    }
    level[0]
}
