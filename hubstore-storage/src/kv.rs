//! Key-value store abstraction.
//!
//! The cache never writes through this trait; it only counts and scans.
//! Writes go through [`Transaction`] batches built by the record helpers.

use async_trait::async_trait;
use hubstore_core::HubResult;

/// What a scan visitor wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Visitor invoked with each `(key, value)` pair under a prefix, in key order.
pub type ScanVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> HubResult<ScanControl> + Send + 'a;

/// A single write in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An atomic batch of writes, applied in order by [`KvStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Ordered byte-key store.
///
/// Implementations must iterate keys in lexicographic byte order, since the
/// earliest-message lookup relies on the first key under a prefix being the
/// smallest.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Fetch a single value.
    async fn get(&self, key: &[u8]) -> HubResult<Option<Vec<u8>>>;

    /// Number of keys starting with `prefix`.
    async fn count_keys_at_prefix(&self, prefix: &[u8]) -> HubResult<u64>;

    /// Visit every key starting with `prefix`, in order, until the visitor
    /// stops or fails. A visitor error aborts the scan and is returned as is.
    async fn scan_prefix(&self, prefix: &[u8], visitor: &mut ScanVisitor<'_>) -> HubResult<()>;

    /// Apply a batch atomically.
    async fn commit(&self, txn: Transaction) -> HubResult<()>;
}
