//! # Bucketed Key/Value Store
//!
//! A single binary file holding a fixed set of named buckets. The in-memory
//! image is the source of truth while running; every committed batch is
//! persisted atomically via a temp file and rename, so a crash leaves either
//! the previous or the new image on disk, never a torn one.
//!
//! ## File format
//!
//! A flat sequence of records:
//!
//! ```text
//! [bucket_len:u32][bucket][key_len:u32][key][value_len:u32][value]...
//! ```
//!
//! ## Batch semantics
//!
//! [`Store::update`] stages puts and deletes into a [`Batch`] and applies
//! them under the writer half of the store lock: either all operations land,
//! or (when the closure errors or persistence fails) none do. Readers run
//! concurrently with at most one writer.

use crate::errors::StoreError;
use parking_lot::RwLock;
use shared_types::TransactionKind;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed key of the serialized head-state pointer in the meta bucket.
pub const HEAD_STATE_KEY: &[u8] = b"accord-head-state";

/// The named sub-containers of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Block bodies, keyed by `height_be ++ hash`.
    Blocks,
    /// Per-kind transaction pool, keyed by transaction hash.
    TxPool(TransactionKind),
    /// Accounts, keyed by address.
    Accounts,
    /// Hosted resources, keyed by resource id.
    Resources,
    /// Registered providers, keyed by provider address.
    Providers,
    /// Chain metadata; holds [`HEAD_STATE_KEY`].
    Meta,
}

impl Bucket {
    /// The stable bucket name used in the file format.
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Bucket::Blocks => Cow::Borrowed("accord-block-index"),
            Bucket::TxPool(kind) => Cow::Owned(format!("accord-tx-pool:{}", kind.name())),
            Bucket::Accounts => Cow::Borrowed("accord-account-index"),
            Bucket::Resources => Cow::Borrowed("accord-resource-index"),
            Bucket::Providers => Cow::Borrowed("accord-provider-index"),
            Bucket::Meta => Cow::Borrowed("accord-meta"),
        }
    }
}

/// A staged write batch; applied all-or-nothing by [`Store::update`].
#[derive(Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

enum BatchOp {
    Put {
        bucket: Bucket,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: Bucket,
        key: Vec<u8>,
    },
}

impl Batch {
    /// Stage a put.
    pub fn put(&mut self, bucket: Bucket, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { bucket, key, value });
    }

    /// Stage a delete. Deleting an absent key is a no-op.
    pub fn delete(&mut self, bucket: Bucket, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { bucket, key });
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

struct StoreInner {
    buckets: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    path: PathBuf,
}

/// The durable bucketed key/value store.
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    /// Open the store at `path`, loading the existing image if present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let buckets = if path.exists() {
            let buckets = Self::load_from_file(&path)?;
            info!(
                path = %path.display(),
                buckets = buckets.len(),
                "loaded existing store file"
            );
            buckets
        } else {
            debug!(path = %path.display(), "no existing store file");
            HashMap::new()
        };

        Ok(Self {
            inner: RwLock::new(StoreInner { buckets, path }),
        })
    }

    /// Read one value.
    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .read()
            .buckets
            .get(bucket.name().as_ref())
            .and_then(|b| b.get(key).cloned())
    }

    /// All entries of `bucket`, sorted by key.
    pub fn scan(&self, bucket: Bucket) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.inner
            .read()
            .buckets
            .get(bucket.name().as_ref())
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of entries in `bucket`.
    pub fn bucket_len(&self, bucket: Bucket) -> usize {
        self.inner
            .read()
            .buckets
            .get(bucket.name().as_ref())
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Run `f` against a fresh batch and commit it atomically.
    ///
    /// If `f` errors the batch is dropped untouched. If persisting the new
    /// image fails, the in-memory image is rolled back entry by entry before
    /// the error propagates, so the store observably never changes.
    pub fn update<E, F>(&self, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Batch) -> Result<(), E>,
        E: From<StoreError>,
    {
        let mut batch = Batch::default();
        f(&mut batch)?;

        let mut inner = self.inner.write();

        // Apply while recording undo operations.
        let mut undo: Vec<(String, Vec<u8>, Option<Vec<u8>>)> = Vec::with_capacity(batch.len());
        for op in &batch.ops {
            match op {
                BatchOp::Put { bucket, key, value } => {
                    let name = bucket.name().into_owned();
                    let prior = inner
                        .buckets
                        .entry(name.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                    undo.push((name, key.clone(), prior));
                }
                BatchOp::Delete { bucket, key } => {
                    let name = bucket.name().into_owned();
                    let prior = inner
                        .buckets
                        .entry(name.clone())
                        .or_default()
                        .remove(key);
                    undo.push((name, key.clone(), prior));
                }
            }
        }

        if let Err(err) = Self::save_to_file(&inner) {
            // Roll back in reverse order so earlier states win.
            for (name, key, prior) in undo.into_iter().rev() {
                let bucket = inner.buckets.entry(name).or_default();
                match prior {
                    Some(value) => {
                        bucket.insert(key, value);
                    }
                    None => {
                        bucket.remove(&key);
                    }
                }
            }
            return Err(E::from(err));
        }

        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>, StoreError> {
        let mut file = std::fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut buckets: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>> = HashMap::new();
        let mut cursor = 0usize;

        while cursor < bytes.len() {
            let bucket = read_chunk(&bytes, &mut cursor)?;
            let key = read_chunk(&bytes, &mut cursor)?;
            let value = read_chunk(&bytes, &mut cursor)?;
            let name = String::from_utf8(bucket)
                .map_err(|_| StoreError::Corrupt("bucket name is not UTF-8".into()))?;
            buckets.entry(name).or_default().insert(key, value);
        }

        Ok(buckets)
    }

    fn save_to_file(inner: &StoreInner) -> Result<(), StoreError> {
        if let Some(parent) = inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut bytes = Vec::new();
        for (name, bucket) in &inner.buckets {
            for (key, value) in bucket {
                write_chunk(&mut bytes, name.as_bytes());
                write_chunk(&mut bytes, key);
                write_chunk(&mut bytes, value);
            }
        }

        // Write atomically via temp file.
        let temp_path = inner.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &inner.path)?;

        Ok(())
    }
}

fn write_chunk(buf: &mut Vec<u8>, chunk: &[u8]) {
    buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    buf.extend_from_slice(chunk);
}

fn read_chunk(bytes: &[u8], cursor: &mut usize) -> Result<Vec<u8>, StoreError> {
    if *cursor + 4 > bytes.len() {
        return Err(StoreError::Corrupt("truncated length prefix".into()));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    *cursor += 4;
    if *cursor + len > bytes.len() {
        return Err(StoreError::Corrupt("truncated record".into()));
    }
    let chunk = bytes[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("chain.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = temp_store();
        store
            .update::<StoreError, _>(|batch| {
                batch.put(Bucket::Accounts, b"alice".to_vec(), b"100".to_vec());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get(Bucket::Accounts, b"alice"), Some(b"100".to_vec()));
        assert_eq!(store.get(Bucket::Accounts, b"bob"), None);
    }

    #[test]
    fn test_buckets_are_isolated() {
        let (_dir, store) = temp_store();
        store
            .update::<StoreError, _>(|batch| {
                batch.put(Bucket::Accounts, b"k".to_vec(), b"account".to_vec());
                batch.put(Bucket::Providers, b"k".to_vec(), b"provider".to_vec());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get(Bucket::Accounts, b"k"), Some(b"account".to_vec()));
        assert_eq!(store.get(Bucket::Providers, b"k"), Some(b"provider".to_vec()));
        assert_eq!(store.get(Bucket::Meta, b"k"), None);
    }

    #[test]
    fn test_failed_batch_leaves_store_unchanged() {
        let (_dir, store) = temp_store();
        store
            .update::<StoreError, _>(|batch| {
                batch.put(Bucket::Accounts, b"alice".to_vec(), b"100".to_vec());
                Ok(())
            })
            .unwrap();

        let result = store.update::<StoreError, _>(|batch| {
            batch.put(Bucket::Accounts, b"alice".to_vec(), b"0".to_vec());
            batch.put(Bucket::Accounts, b"bob".to_vec(), b"50".to_vec());
            Err(StoreError::Corrupt("validation failed mid-batch".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.get(Bucket::Accounts, b"alice"), Some(b"100".to_vec()));
        assert_eq!(store.get(Bucket::Accounts, b"bob"), None);
    }

    #[test]
    fn test_reload_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .update::<StoreError, _>(|batch| {
                    batch.put(
                        Bucket::Blocks,
                        vec![0, 0, 0, 1],
                        b"block-one-bytes".to_vec(),
                    );
                    batch.put(
                        Bucket::TxPool(TransactionKind::Transfer),
                        vec![0xAA; 32],
                        b"tx-bytes".to_vec(),
                    );
                    batch.put(Bucket::Meta, HEAD_STATE_KEY.to_vec(), b"head".to_vec());
                    Ok(())
                })
                .unwrap();
        }

        let reloaded = Store::open(&path).unwrap();
        assert_eq!(
            reloaded.get(Bucket::Blocks, &[0, 0, 0, 1]),
            Some(b"block-one-bytes".to_vec())
        );
        assert_eq!(
            reloaded.get(Bucket::TxPool(TransactionKind::Transfer), &[0xAA; 32]),
            Some(b"tx-bytes".to_vec())
        );
        assert_eq!(
            reloaded.get(Bucket::Meta, HEAD_STATE_KEY),
            Some(b"head".to_vec())
        );
    }

    #[test]
    fn test_scan_is_key_ordered() {
        let (_dir, store) = temp_store();
        store
            .update::<StoreError, _>(|batch| {
                batch.put(Bucket::Blocks, vec![0, 0, 0, 2], b"two".to_vec());
                batch.put(Bucket::Blocks, vec![0, 0, 0, 0], b"zero".to_vec());
                batch.put(Bucket::Blocks, vec![0, 0, 0, 1], b"one".to_vec());
                Ok(())
            })
            .unwrap();

        let entries = store.scan(Bucket::Blocks);
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![vec![0, 0, 0, 0], vec![0, 0, 0, 1], vec![0, 0, 0, 2]]
        );
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let (_dir, store) = temp_store();
        store
            .update::<StoreError, _>(|batch| {
                batch.delete(Bucket::Accounts, b"ghost".to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(store.bucket_len(Bucket::Accounts), 0);
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.db");
        std::fs::write(&path, [0xFF, 0xFF, 0xFF, 0xFF, 0x01]).unwrap();

        assert!(matches!(Store::open(&path), Err(StoreError::Corrupt(_))));
    }
}
