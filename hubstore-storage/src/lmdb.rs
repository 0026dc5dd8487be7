//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB). LMDB keeps keys in
//! lexicographic byte order, which is exactly what prefix scans need.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get`, counts and scans
//! - One write transaction per [`Transaction`] batch
//!
//! Read transactions are opened and closed inside synchronous helpers, so no
//! LMDB handle is ever held across an `.await`.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use hubstore_core::{HubResult, LmdbConfig, StorageError};

use crate::kv::{KvStore, ScanControl, ScanVisitor, Transaction, WriteOp};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Iteration error.
    #[error("Iteration error under prefix {prefix}: {reason}")]
    Iteration { prefix: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to HubError.
impl From<LmdbStoreError> for hubstore_core::HubError {
    fn from(e: LmdbStoreError) -> Self {
        let storage = match e {
            LmdbStoreError::Iteration { prefix, reason } => {
                StorageError::IterationFailed { prefix, reason }
            }
            LmdbStoreError::Io(io) => StorageError::Io {
                reason: io.to_string(),
            },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        };
        hubstore_core::HubError::Storage(storage)
    }
}

/// LMDB-backed [`KvStore`].
///
/// # Example
///
/// ```ignore
/// use hubstore_storage::LmdbStore;
///
/// let store = LmdbStore::new("/var/lib/hub/db", 1024)?;
/// put_message(&store, &message).await?;
/// let count = store.count_keys_at_prefix(&make_message_prefix(fid, postfix)).await?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) an LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        // Ensure directory exists
        std::fs::create_dir_all(&path)?;

        // Open LMDB environment
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        // Open the default database
        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Open a store from configuration.
    pub fn open(config: &LmdbConfig) -> HubResult<Self> {
        config.validate()?;
        Ok(Self::new(&config.path, config.map_size_mb)?)
    }

    fn get_sync(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let value = self
            .db
            .get(&rtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(value.map(<[u8]>::to_vec))
    }

    fn count_sync(&self, prefix: &[u8]) -> Result<u64, LmdbStoreError> {
        let iteration = |e: heed::Error| LmdbStoreError::Iteration {
            prefix: hex::encode(prefix),
            reason: e.to_string(),
        };
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let iter = self.db.prefix_iter(&rtxn, prefix).map_err(iteration)?;

        let mut count = 0u64;
        for result in iter {
            result.map_err(iteration)?;
            count += 1;
        }
        Ok(count)
    }

    fn scan_sync(&self, prefix: &[u8], visitor: &mut ScanVisitor<'_>) -> HubResult<()> {
        let iteration = |e: heed::Error| LmdbStoreError::Iteration {
            prefix: hex::encode(prefix),
            reason: e.to_string(),
        };
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let iter = self.db.prefix_iter(&rtxn, prefix).map_err(iteration)?;

        for result in iter {
            let (key, value) = result.map_err(iteration)?;
            if visitor(key, value)? == ScanControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn commit_sync(&self, txn: Transaction) -> Result<(), LmdbStoreError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        for op in txn.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    self.db
                        .put(&mut wtxn, &key, &value)
                        .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
                }
                WriteOp::Delete { key } => {
                    self.db
                        .delete(&mut wtxn, &key)
                        .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
                }
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl KvStore for LmdbStore {
    async fn get(&self, key: &[u8]) -> HubResult<Option<Vec<u8>>> {
        Ok(self.get_sync(key)?)
    }

    async fn count_keys_at_prefix(&self, prefix: &[u8]) -> HubResult<u64> {
        Ok(self.count_sync(prefix)?)
    }

    async fn scan_prefix(&self, prefix: &[u8], visitor: &mut ScanVisitor<'_>) -> HubResult<()> {
        self.scan_sync(prefix, visitor)
    }

    async fn commit(&self, txn: Transaction) -> HubResult<()> {
        Ok(self.commit_sync(txn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    async fn seed(store: &LmdbStore) {
        store
            .commit(
                Transaction::new()
                    .put(vec![1, 0, 2], b"b".to_vec())
                    .put(vec![1, 0, 1], b"a".to_vec())
                    .put(vec![1, 1], b"c".to_vec())
                    .put(vec![2, 0], b"d".to_vec()),
            )
            .await
            .expect("commit should succeed");
    }

    #[tokio::test]
    async fn test_get_after_commit() {
        let (store, _dir) = create_test_store();
        seed(&store).await;
        assert_eq!(store.get(&[1, 1]).await.unwrap(), Some(b"c".to_vec()));
        assert_eq!(store.get(&[9]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_count_keys_at_prefix() {
        let (store, _dir) = create_test_store();
        seed(&store).await;
        assert_eq!(store.count_keys_at_prefix(&[1]).await.unwrap(), 3);
        assert_eq!(store.count_keys_at_prefix(&[1, 0]).await.unwrap(), 2);
        assert_eq!(store.count_keys_at_prefix(&[3]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered() {
        let (store, _dir) = create_test_store();
        seed(&store).await;

        let mut keys = Vec::new();
        store
            .scan_prefix(&[1], &mut |key: &[u8], _value: &[u8]| -> HubResult<ScanControl> {
                keys.push(key.to_vec());
                Ok(ScanControl::Continue)
            })
            .await
            .unwrap();
        assert_eq!(keys, vec![vec![1, 0, 1], vec![1, 0, 2], vec![1, 1]]);
    }

    #[tokio::test]
    async fn test_scan_prefix_stops_early() {
        let (store, _dir) = create_test_store();
        seed(&store).await;

        let mut first = None;
        store
            .scan_prefix(&[1], &mut |key: &[u8], _value: &[u8]| -> HubResult<ScanControl> {
                first = Some(key.to_vec());
                Ok(ScanControl::Stop)
            })
            .await
            .unwrap();
        assert_eq!(first, Some(vec![1, 0, 1]));
    }

    #[tokio::test]
    async fn test_delete_in_batch() {
        let (store, _dir) = create_test_store();
        seed(&store).await;
        store
            .commit(Transaction::new().delete(vec![2, 0]).put(vec![2, 1], b"e".to_vec()))
            .await
            .unwrap();
        assert_eq!(store.get(&[2, 0]).await.unwrap(), None);
        assert_eq!(store.count_keys_at_prefix(&[2]).await.unwrap(), 1);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let err = LmdbStore::open(&LmdbConfig::new("")).unwrap_err();
        assert!(matches!(err, hubstore_core::HubError::Config(_)));
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = LmdbConfig::new(temp_dir.path()).with_map_size_mb(8);
        let store = LmdbStore::open(&config).unwrap();
        store
            .commit(Transaction::new().put(vec![7], vec![7]))
            .await
            .unwrap();
        assert_eq!(store.count_keys_at_prefix(&[7]).await.unwrap(), 1);
    }
}
