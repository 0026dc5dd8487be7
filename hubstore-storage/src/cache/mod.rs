//! Storage cache: per-fid message counts, earliest messages and storage
//! entitlement, kept current from the hub event stream.

mod coalesce;
mod ledger;
mod storage_cache;

pub use coalesce::{CoalesceMetrics, Coalescer};
pub use ledger::{Rental, RentalLedger};
pub use storage_cache::{CacheKey, StorageCache, StorageCacheCoalesceMetrics, StorageCacheStats};
