//! # Producer Identity Keys
//!
//! Ed25519 keys bound to the chain's identity rules: an account address is
//! the fingerprint of the owner's public key, and a signature always covers
//! a 32-byte fingerprint digest (a block hash, a transaction hash, a billing
//! request hash), never raw message bytes. Callers hash first, then sign the
//! digest, so the signed bytes are identical on every implementation that
//! agrees on the canonical encoding.
//!
//! Secret key material is zeroized on drop.

use crate::hashing::{fingerprint, Fingerprint};
use crate::CryptoError;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::Zeroize;

/// Raw public key bytes as carried in signed headers and transactions.
pub type PublicKeyBytes = [u8; 32];

/// Raw signature bytes as carried on the wire.
pub type SignatureBytes = [u8; 64];

/// Derive the account address owned by a public key: the fingerprint of the
/// key bytes.
pub fn address_of(public_key: &PublicKeyBytes) -> Fingerprint {
    fingerprint(public_key)
}

/// Verify `signature` over a fingerprint digest against `signee`.
///
/// The key bytes are validated as a curve point before the signature is
/// checked, so garbage signee bytes fail with `InvalidPublicKey` rather
/// than a misleading verification failure.
pub fn verify_fingerprint(
    signee: &PublicKeyBytes,
    digest: &Fingerprint,
    signature: &SignatureBytes,
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(signee).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(digest, &sig)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// A producer identity: the signing key together with the account address
/// it owns on chain.
///
/// The address is derived once at construction; everything that needs "who
/// is this node on chain" reads it from here instead of re-hashing the key.
pub struct NodeKeyPair {
    signing_key: SigningKey,
    address: Fingerprint,
}

impl NodeKeyPair {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Rebuild the identity from a secret seed (32 bytes).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// The public key bytes placed in signed headers and transactions.
    pub fn public_key(&self) -> PublicKeyBytes {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The account address this identity owns.
    pub fn address(&self) -> Fingerprint {
        self.address
    }

    /// Sign a fingerprint digest. Deterministic, no RNG involved, so the
    /// same digest always yields the same signature bytes.
    pub fn sign_fingerprint(&self, digest: &Fingerprint) -> SignatureBytes {
        self.signing_key.sign(digest).to_bytes()
    }

    /// The secret seed, for the keystore.
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Drop for NodeKeyPair {
    fn drop(&mut self) {
        let mut bytes = self.signing_key.to_bytes();
        bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_digest_verifies() {
        let identity = NodeKeyPair::generate();
        let digest = fingerprint(b"block header preimage");

        let signature = identity.sign_fingerprint(&digest);
        assert!(verify_fingerprint(&identity.public_key(), &digest, &signature).is_ok());
    }

    #[test]
    fn test_tampered_digest_rejected() {
        let identity = NodeKeyPair::generate();
        let signature = identity.sign_fingerprint(&fingerprint(b"original"));

        let result = verify_fingerprint(
            &identity.public_key(),
            &fingerprint(b"tampered"),
            &signature,
        );
        assert!(matches!(
            result,
            Err(CryptoError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_foreign_identity_rejected() {
        let signer = NodeKeyPair::generate();
        let other = NodeKeyPair::generate();
        let digest = fingerprint(b"digest");

        let signature = signer.sign_fingerprint(&digest);
        assert!(verify_fingerprint(&other.public_key(), &digest, &signature).is_err());
    }

    #[test]
    fn test_address_is_key_fingerprint() {
        let identity = NodeKeyPair::generate();
        assert_eq!(identity.address(), address_of(&identity.public_key()));
        assert_eq!(identity.address(), fingerprint(&identity.public_key()));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let identity = NodeKeyPair::from_seed([0xAB; 32]);
        let digest = fingerprint(b"same digest");
        assert_eq!(
            identity.sign_fingerprint(&digest),
            identity.sign_fingerprint(&digest)
        );
    }

    #[test]
    fn test_seed_roundtrip_preserves_identity() {
        let original = NodeKeyPair::generate();
        let restored = NodeKeyPair::from_seed(original.to_seed());
        assert_eq!(original.public_key(), restored.public_key());
        assert_eq!(original.address(), restored.address());
    }
}
