//! # Keystore
//!
//! File-backed node identity. The private key seed is stored hex-encoded in
//! a single file; a missing file is populated with a freshly generated
//! keypair on first open.

use crate::signatures::NodeKeyPair;
use crate::CryptoError;
use std::path::{Path, PathBuf};

/// File-backed keystore holding the local node keypair.
pub struct Keystore {
    path: PathBuf,
    keypair: NodeKeyPair,
}

impl Keystore {
    /// Open the keystore at `path`, generating a new keypair if absent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CryptoError> {
        let path = path.as_ref().to_path_buf();
        let keypair = if path.exists() {
            Self::load_seed(&path)?
        } else {
            let keypair = NodeKeyPair::generate();
            Self::store_seed(&path, &keypair)?;
            keypair
        };
        Ok(Self { path, keypair })
    }

    fn load_seed(path: &Path) -> Result<NodeKeyPair, CryptoError> {
        let content = std::fs::read_to_string(path)?;
        let bytes = hex::decode(content.trim())
            .map_err(|e| CryptoError::MalformedKeystore(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedKeystore("seed is not 32 bytes".into()))?;
        Ok(NodeKeyPair::from_seed(seed))
    }

    fn store_seed(path: &Path, keypair: &NodeKeyPair) -> Result<(), CryptoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(keypair.to_seed()))?;
        Ok(())
    }

    /// The local keypair.
    pub fn keypair(&self) -> &NodeKeyPair {
        &self.keypair
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");

        let first = Keystore::open(&path).unwrap();
        let second = Keystore::open(&path).unwrap();
        assert_eq!(
            first.keypair().public_key(),
            second.keypair().public_key()
        );
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        std::fs::write(&path, "not-hex").unwrap();

        assert!(matches!(
            Keystore::open(&path),
            Err(CryptoError::MalformedKeystore(_))
        ));
    }
}
