//! Crypto error types.

use thiserror::Error;

/// Errors surfaced by the crypto wrappers.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The bytes do not decode to a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Keystore file could not be read or written.
    #[error("keystore I/O error: {0}")]
    KeystoreIo(#[from] std::io::Error),

    /// Keystore file content is malformed.
    #[error("malformed keystore file: {0}")]
    MalformedKeystore(String),
}
