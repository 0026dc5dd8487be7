//! Hubstore Storage
//!
//! Key-value store backends, the key layout of the hub database, and the
//! storage cache built on top of them.

pub mod cache;
pub mod keys;
pub mod kv;
pub mod lmdb;
pub mod memory;
pub mod records;

pub use cache::{
    CacheKey, CoalesceMetrics, Coalescer, Rental, RentalLedger, StorageCache,
    StorageCacheCoalesceMetrics, StorageCacheStats,
};
pub use keys::{
    make_message_prefix, make_message_primary_key, make_on_chain_event_fid_prefix,
    make_on_chain_event_primary_key, make_on_chain_event_type_prefix, make_user_key,
    parse_message_ts_hash, parse_on_chain_event_key, parse_user_key, user_root_prefix,
    MessageKey, OnChainEventKey, RootPrefix,
};
pub use kv::{KvStore, ScanControl, ScanVisitor, Transaction, WriteOp};
pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;
pub use records::{
    decode_message, decode_on_chain_event, delete_message_transaction, encode_message,
    encode_on_chain_event, get_message, message_primary_key, put_message,
    put_message_transaction, put_on_chain_event, put_on_chain_event_transaction,
};
