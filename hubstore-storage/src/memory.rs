//! Ordered in-memory store.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hubstore_core::{HubResult, StorageError};

use crate::kv::{KvStore, ScanControl, ScanVisitor, Transaction, WriteOp};

/// In-memory [`KvStore`] backed by a `BTreeMap`, for tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prefix_entries(&self, prefix: &[u8]) -> HubResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> HubResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn count_keys_at_prefix(&self, prefix: &[u8]) -> HubResult<u64> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let count = entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .count();
        Ok(count as u64)
    }

    async fn scan_prefix(&self, prefix: &[u8], visitor: &mut ScanVisitor<'_>) -> HubResult<()> {
        // Snapshot first so the visitor never runs under the store lock.
        for (key, value) in self.prefix_entries(prefix)? {
            if visitor(&key, &value)? == ScanControl::Stop {
                break;
            }
        }
        Ok(())
    }

    async fn commit(&self, txn: Transaction) -> HubResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        for op in txn.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .commit(
                Transaction::new()
                    .put(vec![1, 2, 3], vec![0])
                    .put(vec![1, 2, 4], vec![1])
                    .put(vec![1, 3], vec![2])
                    .put(vec![2], vec![3]),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_count_keys_at_prefix() {
        let store = seeded().await;
        assert_eq!(store.count_keys_at_prefix(&[1]).await.unwrap(), 3);
        assert_eq!(store.count_keys_at_prefix(&[1, 2]).await.unwrap(), 2);
        assert_eq!(store.count_keys_at_prefix(&[9]).await.unwrap(), 0);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_scan_prefix_in_order_with_stop() {
        let store = seeded().await;
        let mut seen = Vec::new();
        store
            .scan_prefix(&[1], &mut |key: &[u8], _value: &[u8]| -> HubResult<ScanControl> {
                seen.push(key.to_vec());
                Ok(if seen.len() == 2 {
                    ScanControl::Stop
                } else {
                    ScanControl::Continue
                })
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![vec![1, 2, 3], vec![1, 2, 4]]);
    }

    #[tokio::test]
    async fn test_visitor_error_aborts_scan() {
        let store = seeded().await;
        let mut visits = 0;
        let result = store
            .scan_prefix(&[1], &mut |_key: &[u8], _value: &[u8]| -> HubResult<ScanControl> {
                visits += 1;
                Err(StorageError::Io {
                    reason: "boom".to_string(),
                }
                .into())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(visits, 1);
    }

    #[tokio::test]
    async fn test_commit_delete() {
        let store = seeded().await;
        store
            .commit(Transaction::new().delete(vec![2]))
            .await
            .unwrap();
        assert_eq!(store.get(&[2]).await.unwrap(), None);
        assert_eq!(store.get(&[1, 3]).await.unwrap(), Some(vec![2]));
    }
}
