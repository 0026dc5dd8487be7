//! Per-fid storage cache.
//!
//! Answers three questions in O(1) once warm:
//! - how many live messages a fid has in a category,
//! - which of them is the earliest,
//! - how much storage the fid is entitled to right now.
//!
//! State comes from one of three places: a full [`StorageCache::sync_from_db`],
//! a coalesced cold scan of a single key, or the hub event stream via
//! [`StorageCache::process_event`]. The store is never written.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use hubstore_core::{
    Clock, EventError, Fid, HubEvent, HubEventBody, HubResult, LeaseSchedule, Message,
    OnChainEventType, StorageCacheConfig, StorageError, StorageSlot, SystemClock, TsHash,
    UserPostfix,
};
use tracing::{debug, info, warn};

use super::coalesce::{CoalesceMetrics, Coalescer};
use super::ledger::{Rental, RentalLedger};
use crate::keys::{
    make_message_prefix, make_on_chain_event_fid_prefix, make_on_chain_event_type_prefix,
    parse_message_ts_hash, parse_on_chain_event_key, parse_user_key, user_root_prefix,
};
use crate::kv::{KvStore, ScanControl};
use crate::records::decode_on_chain_event;

// ============================================================================
// KEYS AND ENTRIES
// ============================================================================

/// Cache key: one message category of one fid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fid: Fid,
    pub postfix: UserPostfix,
}

impl CacheKey {
    pub fn new(fid: Fid, postfix: UserPostfix) -> Self {
        Self { fid, postfix }
    }

    pub fn of(message: &Message) -> Self {
        Self::new(message.fid(), message.postfix())
    }
}

/// Resolved earliest-message state. A key with no entry is unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EarliestEntry {
    Absent,
    Known(TsHash),
}

impl EarliestEntry {
    fn value(self) -> Option<TsHash> {
        match self {
            Self::Absent => None,
            Self::Known(ts_hash) => Some(ts_hash),
        }
    }
}

/// Keys with a cold scan in flight, and whether an event touched the key
/// since the scan began. A touched scan does not install its result.
#[derive(Debug)]
struct ScanTracker<K> {
    touched: HashMap<K, bool>,
}

impl<K> Default for ScanTracker<K> {
    fn default() -> Self {
        Self {
            touched: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> ScanTracker<K> {
    fn begin(&mut self, key: K) {
        self.touched.insert(key, false);
    }

    fn touch(&mut self, key: &K) {
        if let Some(touched) = self.touched.get_mut(key) {
            *touched = true;
        }
    }

    fn finish(&mut self, key: &K) -> bool {
        self.touched.remove(key).unwrap_or(true)
    }
}

/// Event changes applied while a full sync is scanning. They are replayed
/// onto the scanned maps when the sync installs them.
#[derive(Debug, Default)]
struct SyncJournal {
    messages: Vec<JournalEntry>,
    rentals: Vec<(Fid, Rental)>,
}

#[derive(Debug, Clone, Copy)]
enum JournalEntry {
    Added(CacheKey, TsHash),
    Removed(CacheKey, TsHash),
}

impl SyncJournal {
    fn len(&self) -> usize {
        self.messages.len() + self.rentals.len()
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Debug, Default)]
struct CacheState {
    counts: HashMap<CacheKey, u64>,
    earliest: HashMap<CacheKey, EarliestEntry>,
    ledgers: HashMap<Fid, RentalLedger>,
    count_scans: ScanTracker<CacheKey>,
    earliest_scans: ScanTracker<CacheKey>,
    ledger_scans: ScanTracker<Fid>,
    /// Set once a full sync has mirrored every fid's rentals.
    synced: bool,
    /// Present while a full sync is scanning.
    sync_journal: Option<SyncJournal>,
}

impl CacheState {
    fn add_message(&mut self, message: &Message) {
        let key = CacheKey::of(message);
        self.count_scans.touch(&key);
        self.earliest_scans.touch(&key);

        let ts_hash = message.ts_hash();
        if let Some(journal) = self.sync_journal.as_mut() {
            journal.messages.push(JournalEntry::Added(key, ts_hash));
        }

        if let Some(count) = self.counts.get_mut(&key) {
            *count += 1;
        }
        self.lower_earliest(key, ts_hash);
    }

    fn lower_earliest(&mut self, key: CacheKey, ts_hash: TsHash) {
        match self.earliest.get(&key) {
            Some(EarliestEntry::Known(current)) if *current <= ts_hash => {}
            _ => {
                self.earliest.insert(key, EarliestEntry::Known(ts_hash));
            }
        }
    }

    // Unset only. The next-earliest message is not looked up here; the next
    // query for this key rescans the store.
    fn unset_earliest(&mut self, key: CacheKey, ts_hash: TsHash) {
        if self.earliest.get(&key) == Some(&EarliestEntry::Known(ts_hash)) {
            self.earliest.remove(&key);
        }
    }

    fn remove_message(&mut self, message: &Message) -> Result<(), EventError> {
        let key = CacheKey::of(message);
        self.count_scans.touch(&key);
        self.earliest_scans.touch(&key);

        let ts_hash = message.ts_hash();
        if let Some(journal) = self.sync_journal.as_mut() {
            journal.messages.push(JournalEntry::Removed(key, ts_hash));
        }
        self.unset_earliest(key, ts_hash);

        match self.counts.get(&key).copied() {
            Some(0) => {
                self.counts.remove(&key);
                Err(EventError::CountUnderflow {
                    fid: key.fid,
                    postfix: key.postfix,
                })
            }
            Some(count) => {
                self.counts.insert(key, count - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Returns true if the rental was newly recorded.
    fn add_rental(&mut self, fid: Fid, rental: Rental) -> bool {
        self.ledger_scans.touch(&fid);
        if let Some(journal) = self.sync_journal.as_mut() {
            journal.rentals.push((fid, rental));
        }
        if let Some(ledger) = self.ledgers.get_mut(&fid) {
            return ledger.insert(rental);
        }
        if self.synced {
            // After a sync, a fid without a ledger has no rentals.
            return self.ledgers.entry(fid).or_default().insert(rental);
        }
        false
    }

    /// Install the maps built by a full sync, then replay the journal on top.
    ///
    /// Counts of journaled keys are dropped rather than adjusted, since the
    /// scan may or may not have seen each change; they are re-read on next
    /// query. Returns the number of replayed changes.
    fn install_sync(
        &mut self,
        counts: HashMap<CacheKey, u64>,
        earliest: HashMap<CacheKey, EarliestEntry>,
        ledgers: HashMap<Fid, RentalLedger>,
    ) -> usize {
        let journal = self.sync_journal.take().unwrap_or_default();
        self.counts = counts;
        self.earliest = earliest;
        self.ledgers = ledgers;
        self.synced = true;

        for entry in &journal.messages {
            match *entry {
                JournalEntry::Added(key, ts_hash) => {
                    self.counts.remove(&key);
                    self.lower_earliest(key, ts_hash);
                }
                JournalEntry::Removed(key, ts_hash) => {
                    self.counts.remove(&key);
                    self.unset_earliest(key, ts_hash);
                }
            }
        }
        for (fid, rental) in &journal.rentals {
            self.ledgers.entry(*fid).or_default().insert(*rental);
        }
        journal.len()
    }
}

/// Keeps the sync journal open for the duration of one full sync. Dropping
/// it without [`SyncJournalGuard::disarm`] closes the journal, so a failed or
/// cancelled sync stops recording.
struct SyncJournalGuard<'a> {
    state: &'a RwLock<CacheState>,
    armed: bool,
}

impl<'a> SyncJournalGuard<'a> {
    fn begin(state: &'a RwLock<CacheState>) -> HubResult<Self> {
        write_state(state)?.sync_journal = Some(SyncJournal::default());
        Ok(Self { state, armed: true })
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SyncJournalGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.sync_journal = None;
        }
    }
}

type SharedState = Arc<RwLock<CacheState>>;

fn read_state(state: &RwLock<CacheState>) -> HubResult<RwLockReadGuard<'_, CacheState>> {
    state.read().map_err(|_| StorageError::LockPoisoned.into())
}

fn write_state(state: &RwLock<CacheState>) -> HubResult<RwLockWriteGuard<'_, CacheState>> {
    state.write().map_err(|_| StorageError::LockPoisoned.into())
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Default)]
struct StatsCounters {
    count_hits: AtomicU64,
    count_misses: AtomicU64,
    earliest_hits: AtomicU64,
    earliest_misses: AtomicU64,
    slot_queries: AtomicU64,
    syncs: AtomicU64,
    events_processed: AtomicU64,
    rejected_events: AtomicU64,
    inconsistent_events: AtomicU64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageCacheStats {
    pub count_hits: u64,
    pub count_misses: u64,
    pub earliest_hits: u64,
    pub earliest_misses: u64,
    pub slot_queries: u64,
    pub syncs: u64,
    pub events_processed: u64,
    /// Events refused as malformed.
    pub rejected_events: u64,
    /// Events that did not match cached state (count underflow).
    pub inconsistent_events: u64,
    pub cached_counts: u64,
    pub cached_earliest: u64,
    pub mirrored_fids: u64,
}

impl StorageCacheStats {
    /// Fraction of count lookups answered from memory (0.0 to 1.0).
    pub fn count_hit_rate(&self) -> f64 {
        let total = self.count_hits + self.count_misses;
        if total == 0 {
            0.0
        } else {
            self.count_hits as f64 / total as f64
        }
    }
}

/// Coalescing metrics for each kind of cold lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCacheCoalesceMetrics {
    pub counts: CoalesceMetrics,
    pub earliest: CoalesceMetrics,
    pub ledgers: CoalesceMetrics,
}

// ============================================================================
// STORAGE CACHE
// ============================================================================

/// In-memory cache of per-fid message counts, earliest messages and rentals.
///
/// # Example
///
/// ```ignore
/// let cache = StorageCache::with_defaults(Arc::new(store));
/// cache.sync_from_db().await?;
///
/// let casts = cache.get_message_count(fid, UserPostfix::CastMessage).await?;
/// let slot = cache.get_current_storage_slot_for_fid(fid).await?;
///
/// for event in events {
///     cache.process_event(&event)?;
/// }
/// ```
pub struct StorageCache<S: KvStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: StorageCacheConfig,
    lease: LeaseSchedule,
    state: SharedState,
    counts_inflight: Coalescer<CacheKey, u64>,
    earliest_inflight: Coalescer<CacheKey, Option<TsHash>>,
    ledgers_inflight: Coalescer<Fid, RentalLedger>,
    /// Serializes full syncs.
    sync_lock: tokio::sync::Mutex<()>,
    stats: StatsCounters,
}

impl<S: KvStore> StorageCache<S> {
    /// Create a cache over `store`.
    pub fn new(store: Arc<S>, config: StorageCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let lease = config.lease_schedule();
        Self {
            store,
            clock,
            config,
            lease,
            state: Arc::new(RwLock::new(CacheState::default())),
            counts_inflight: Coalescer::new(),
            earliest_inflight: Coalescer::new(),
            ledgers_inflight: Coalescer::new(),
            sync_lock: tokio::sync::Mutex::new(()),
            stats: StatsCounters::default(),
        }
    }

    /// Create a cache with protocol lease rules and the system clock.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, StorageCacheConfig::default(), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &StorageCacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Whether a full sync has completed.
    pub fn is_synced(&self) -> bool {
        self.state
            .read()
            .map(|state| state.synced)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Full sync
    // ------------------------------------------------------------------------

    /// Rebuild every cached value from the store.
    ///
    /// The new maps replace state applied by events before the sync began.
    /// Events processed while the scan runs are journaled and replayed onto
    /// the new maps, so none is lost. On failure the previous state is left
    /// in place.
    pub async fn sync_from_db(&self) -> HubResult<()> {
        let _serial = self.sync_lock.lock().await;
        let started = Instant::now();
        info!("Syncing storage cache from db");

        let journal = SyncJournalGuard::begin(&self.state)?;
        let (counts, earliest, message_keys) = self.scan_messages().await?;
        let (ledgers, rentals) = self.scan_all_rentals().await?;
        let fids = ledgers.len();

        let replayed = write_state(&self.state)?.install_sync(counts, earliest, ledgers);
        journal.disarm();
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);

        info!(
            message_keys,
            rentals,
            fids,
            replayed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Storage cache synced"
        );
        Ok(())
    }

    async fn scan_messages(
        &self,
    ) -> HubResult<(HashMap<CacheKey, u64>, HashMap<CacheKey, EarliestEntry>, u64)> {
        let mut counts: HashMap<CacheKey, u64> = HashMap::new();
        let mut earliest: HashMap<CacheKey, EarliestEntry> = HashMap::new();
        let mut total = 0u64;
        let progress = self.config.sync_progress_interval;

        self.store
            .scan_prefix(
                &user_root_prefix(),
                &mut |key: &[u8], _value: &[u8]| -> HubResult<ScanControl> {
                    let Some(message_key) = parse_user_key(key)? else {
                        return Ok(ScanControl::Continue);
                    };
                    let cache_key = CacheKey::new(message_key.fid, message_key.postfix);
                    *counts.entry(cache_key).or_insert(0) += 1;
                    // Keys under one prefix arrive in ts_hash order.
                    earliest
                        .entry(cache_key)
                        .or_insert(EarliestEntry::Known(message_key.ts_hash));

                    total += 1;
                    if progress > 0 && total % progress == 0 {
                        debug!(message_keys = total, "Storage cache sync progress");
                    }
                    Ok(ScanControl::Continue)
                },
            )
            .await?;

        Ok((counts, earliest, total))
    }

    async fn scan_all_rentals(&self) -> HubResult<(HashMap<Fid, RentalLedger>, u64)> {
        let mut ledgers: HashMap<Fid, RentalLedger> = HashMap::new();
        let mut total = 0u64;

        self.store
            .scan_prefix(
                &make_on_chain_event_type_prefix(OnChainEventType::StorageRent),
                &mut |key: &[u8], value: &[u8]| -> HubResult<ScanControl> {
                    let (fid, rental) = rental_from_record(key, value)?;
                    if ledgers.entry(fid).or_default().insert(rental) {
                        total += 1;
                    }
                    Ok(ScanControl::Continue)
                },
            )
            .await?;

        Ok((ledgers, total))
    }

    // ------------------------------------------------------------------------
    // Message counts
    // ------------------------------------------------------------------------

    /// Number of live messages of `postfix` for `fid`.
    ///
    /// Served from memory when cached; otherwise one coalesced prefix count.
    pub async fn get_message_count(&self, fid: Fid, postfix: UserPostfix) -> HubResult<u64> {
        let key = CacheKey::new(fid, postfix);
        if let Some(count) = self.cached_count(&key)? {
            self.stats.count_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(count);
        }
        self.stats.count_misses.fetch_add(1, Ordering::Relaxed);
        self.load_count(key).await
    }

    async fn load_count(&self, key: CacheKey) -> HubResult<u64> {
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        self.counts_inflight
            .run(key, move || resolve_count(store, state, key))
            .await
    }

    fn cached_count(&self, key: &CacheKey) -> HubResult<Option<u64>> {
        Ok(read_state(&self.state)?.counts.get(key).copied())
    }

    // ------------------------------------------------------------------------
    // Earliest message
    // ------------------------------------------------------------------------

    /// Earliest live message of `postfix` for `fid`, or `None` if there is none.
    ///
    /// A zero count answers `None` without scanning. The count lookup made
    /// here is not recorded in the count stats.
    pub async fn get_earliest_ts_hash(
        &self,
        fid: Fid,
        postfix: UserPostfix,
    ) -> HubResult<Option<TsHash>> {
        let key = CacheKey::new(fid, postfix);
        let count = match self.cached_count(&key)? {
            Some(count) => count,
            None => self.load_count(key).await?,
        };
        if count == 0 {
            return Ok(None);
        }

        if let Some(entry) = self.cached_earliest(&key)? {
            self.stats.earliest_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.value());
        }
        self.stats.earliest_misses.fetch_add(1, Ordering::Relaxed);

        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        self.earliest_inflight
            .run(key, move || resolve_earliest(store, state, key))
            .await
    }

    fn cached_earliest(&self, key: &CacheKey) -> HubResult<Option<EarliestEntry>> {
        Ok(read_state(&self.state)?.earliest.get(key).copied())
    }

    // ------------------------------------------------------------------------
    // Storage entitlement
    // ------------------------------------------------------------------------

    /// Storage entitlement of `fid` at the clock's current time.
    ///
    /// Computed from the mirrored rentals on every call. A fid that is not
    /// mirrored yet is loaded with one coalesced scan of its rentals.
    pub async fn get_current_storage_slot_for_fid(&self, fid: Fid) -> HubResult<StorageSlot> {
        self.stats.slot_queries.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = self.cached_slot(fid)? {
            return Ok(slot);
        }

        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let ledger = self
            .ledgers_inflight
            .run(fid, move || resolve_ledger(store, state, fid))
            .await?;
        Ok(ledger.slot_at(&self.lease, self.clock.now_unix_secs()))
    }

    fn cached_slot(&self, fid: Fid) -> HubResult<Option<StorageSlot>> {
        let state = read_state(&self.state)?;
        let now = self.clock.now_unix_secs();
        match state.ledgers.get(&fid) {
            Some(ledger) => Ok(Some(ledger.slot_at(&self.lease, now))),
            None if state.synced => Ok(Some(StorageSlot::default())),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Apply one hub event. Events must be applied in stream order.
    ///
    /// Only cached entries are adjusted; keys that were never resolved stay
    /// unresolved and are read from the store on first query. Returns an
    /// error only for malformed events, which leave the cache untouched.
    pub fn process_event(&self, event: &HubEvent) -> HubResult<()> {
        if let Err(err) = event.validate() {
            self.stats.rejected_events.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = event.id, error = %err, "Rejected malformed hub event");
            return Err(err);
        }

        {
            let mut state = write_state(&self.state)?;
            match &event.body {
                HubEventBody::MergeMessage {
                    message,
                    deleted_messages,
                } => {
                    state.add_message(message);
                    for deleted in deleted_messages {
                        self.apply_removal(&mut state, event.id, deleted);
                    }
                }
                HubEventBody::PruneMessage { message } | HubEventBody::RevokeMessage { message } => {
                    self.apply_removal(&mut state, event.id, message);
                }
                HubEventBody::MergeOnChainEvent { on_chain_event } => {
                    if let Some(rental) = Rental::from_event(on_chain_event) {
                        if state.add_rental(on_chain_event.fid, rental) {
                            debug!(
                                fid = %on_chain_event.fid,
                                units = rental.units,
                                block_number = rental.block_number,
                                "Recorded storage rental"
                            );
                        }
                    }
                }
                HubEventBody::MergeUsernameProof { .. } => {}
            }
        }

        self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn apply_removal(&self, state: &mut CacheState, event_id: u64, message: &Message) {
        if let Err(err) = state.remove_message(message) {
            self.stats.inconsistent_events.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id,
                error = %err,
                "Inconsistent hub event, count will be re-read from db"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> StorageCacheStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        StorageCacheStats {
            count_hits: self.stats.count_hits.load(Ordering::Relaxed),
            count_misses: self.stats.count_misses.load(Ordering::Relaxed),
            earliest_hits: self.stats.earliest_hits.load(Ordering::Relaxed),
            earliest_misses: self.stats.earliest_misses.load(Ordering::Relaxed),
            slot_queries: self.stats.slot_queries.load(Ordering::Relaxed),
            syncs: self.stats.syncs.load(Ordering::Relaxed),
            events_processed: self.stats.events_processed.load(Ordering::Relaxed),
            rejected_events: self.stats.rejected_events.load(Ordering::Relaxed),
            inconsistent_events: self.stats.inconsistent_events.load(Ordering::Relaxed),
            cached_counts: state.counts.len() as u64,
            cached_earliest: state.earliest.len() as u64,
            mirrored_fids: state.ledgers.len() as u64,
        }
    }

    /// Coalescing metrics for cold lookups.
    pub fn coalesce_metrics(&self) -> StorageCacheCoalesceMetrics {
        StorageCacheCoalesceMetrics {
            counts: self.counts_inflight.metrics(),
            earliest: self.earliest_inflight.metrics(),
            ledgers: self.ledgers_inflight.metrics(),
        }
    }
}

// ============================================================================
// COLD RESOLUTIONS
// ============================================================================
//
// Each runs as a spawned task owned by a coalescer. State is only touched
// through the synchronous helpers below, so no lock guard lives across an
// `.await`.

async fn resolve_count<S: KvStore>(store: Arc<S>, state: SharedState, key: CacheKey) -> HubResult<u64> {
    if let Some(count) = begin_count_scan(&state, key)? {
        return Ok(count);
    }
    let prefix = make_message_prefix(key.fid, key.postfix);
    let scanned = store.count_keys_at_prefix(&prefix).await;
    let count = finish_count_scan(&state, key, scanned)?;
    debug!(fid = %key.fid, postfix = %key.postfix, count, "Resolved message count from db");
    Ok(count)
}

fn begin_count_scan(state: &RwLock<CacheState>, key: CacheKey) -> HubResult<Option<u64>> {
    let mut state = write_state(state)?;
    if let Some(count) = state.counts.get(&key) {
        return Ok(Some(*count));
    }
    state.count_scans.begin(key);
    Ok(None)
}

fn finish_count_scan(
    state: &RwLock<CacheState>,
    key: CacheKey,
    scanned: HubResult<u64>,
) -> HubResult<u64> {
    let mut state = write_state(state)?;
    let touched = state.count_scans.finish(&key);
    let count = scanned?;
    if touched {
        return Ok(count);
    }
    // A value installed by a concurrent sync wins.
    Ok(*state.counts.entry(key).or_insert(count))
}

async fn resolve_earliest<S: KvStore>(
    store: Arc<S>,
    state: SharedState,
    key: CacheKey,
) -> HubResult<Option<TsHash>> {
    if let Some(entry) = begin_earliest_scan(&state, key)? {
        return Ok(entry.value());
    }
    let prefix = make_message_prefix(key.fid, key.postfix);
    let mut first: Option<TsHash> = None;
    let scanned = store
        .scan_prefix(
            &prefix,
            &mut |k: &[u8], _value: &[u8]| -> HubResult<ScanControl> {
                first = Some(parse_message_ts_hash(k)?);
                Ok(ScanControl::Stop)
            },
        )
        .await;
    let found = scanned.map(|()| first);
    let earliest = finish_earliest_scan(&state, key, found)?;
    debug!(fid = %key.fid, postfix = %key.postfix, found = earliest.is_some(), "Resolved earliest message from db");
    Ok(earliest)
}

fn begin_earliest_scan(
    state: &RwLock<CacheState>,
    key: CacheKey,
) -> HubResult<Option<EarliestEntry>> {
    let mut state = write_state(state)?;
    if let Some(entry) = state.earliest.get(&key) {
        return Ok(Some(*entry));
    }
    state.earliest_scans.begin(key);
    Ok(None)
}

fn finish_earliest_scan(
    state: &RwLock<CacheState>,
    key: CacheKey,
    found: HubResult<Option<TsHash>>,
) -> HubResult<Option<TsHash>> {
    let mut state = write_state(state)?;
    let touched = state.earliest_scans.finish(&key);
    let entry = match found? {
        Some(ts_hash) => EarliestEntry::Known(ts_hash),
        None => EarliestEntry::Absent,
    };
    if touched {
        return Ok(entry.value());
    }
    Ok(state.earliest.entry(key).or_insert(entry).value())
}

async fn resolve_ledger<S: KvStore>(
    store: Arc<S>,
    state: SharedState,
    fid: Fid,
) -> HubResult<RentalLedger> {
    if let Some(ledger) = begin_ledger_load(&state, fid)? {
        return Ok(ledger);
    }
    let prefix = make_on_chain_event_fid_prefix(OnChainEventType::StorageRent, fid);
    let mut ledger = RentalLedger::new();
    let scanned = store
        .scan_prefix(
            &prefix,
            &mut |key: &[u8], value: &[u8]| -> HubResult<ScanControl> {
                let (_, rental) = rental_from_record(key, value)?;
                ledger.insert(rental);
                Ok(ScanControl::Continue)
            },
        )
        .await;
    let loaded = scanned.map(|()| ledger);
    let ledger = finish_ledger_load(&state, fid, loaded)?;
    debug!(fid = %fid, rentals = ledger.len(), "Loaded storage rentals from db");
    Ok(ledger)
}

fn begin_ledger_load(state: &RwLock<CacheState>, fid: Fid) -> HubResult<Option<RentalLedger>> {
    let mut state = write_state(state)?;
    if let Some(ledger) = state.ledgers.get(&fid) {
        return Ok(Some(ledger.clone()));
    }
    if state.synced {
        return Ok(Some(RentalLedger::new()));
    }
    state.ledger_scans.begin(fid);
    Ok(None)
}

fn finish_ledger_load(
    state: &RwLock<CacheState>,
    fid: Fid,
    loaded: HubResult<RentalLedger>,
) -> HubResult<RentalLedger> {
    let mut state = write_state(state)?;
    let touched = state.ledger_scans.finish(&fid);
    let ledger = loaded?;
    if touched {
        return Ok(ledger);
    }
    Ok(state.ledgers.entry(fid).or_insert(ledger).clone())
}

/// Decode a stored storage rent record into its fid and rental.
fn rental_from_record(key: &[u8], value: &[u8]) -> HubResult<(Fid, Rental)> {
    let record_key = parse_on_chain_event_key(key)?;
    let event = decode_on_chain_event(key, value)?;
    let Some(rental) = Rental::from_event(&event) else {
        return Err(StorageError::Deserialization {
            key: hex::encode(key),
            reason: format!("expected a storage rent event, found {}", event.event_type),
        }
        .into());
    };
    Ok((record_key.fid, rental))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::make_message_primary_key;
    use crate::kv::Transaction;
    use crate::memory::MemoryStore;
    use crate::records::{put_message, put_on_chain_event};
    use hubstore_core::{
        HubError, ManualClock, MessageData, MessageType, OnChainEvent, OnChainEventBody,
        SignerEventBody, StorageRentEventBody, ValidationError,
    };

    fn message(message_type: MessageType, fid: u64, timestamp: u32) -> Message {
        Message::new(MessageData {
            message_type,
            fid: Fid::new(fid),
            timestamp,
            body: timestamp.to_be_bytes().to_vec(),
        })
    }

    fn rent(fid: u64, block_number: u64, block_timestamp: u64, units: u32) -> OnChainEvent {
        OnChainEvent {
            event_type: OnChainEventType::StorageRent,
            chain_id: 10,
            block_number,
            block_timestamp,
            log_index: 0,
            fid: Fid::new(fid),
            body: OnChainEventBody::StorageRent(StorageRentEventBody { units }),
        }
    }

    fn cache(store: &MemoryStore) -> StorageCache<MemoryStore> {
        StorageCache::with_defaults(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_sync_counts_and_earliest() {
        let store = MemoryStore::new();
        let early = message(MessageType::CastAdd, 1, 10);
        let late = message(MessageType::CastRemove, 1, 20);
        let link = message(MessageType::LinkAdd, 1, 5);
        for m in [&late, &early, &link] {
            put_message(&store, m).await.unwrap();
        }

        let cache = cache(&store);
        cache.sync_from_db().await.unwrap();
        assert!(cache.is_synced());

        let fid = Fid::new(1);
        assert_eq!(cache.get_message_count(fid, UserPostfix::CastMessage).await.unwrap(), 2);
        assert_eq!(cache.get_message_count(fid, UserPostfix::LinkMessage).await.unwrap(), 1);
        assert_eq!(
            cache.get_earliest_ts_hash(fid, UserPostfix::CastMessage).await.unwrap(),
            Some(early.ts_hash())
        );
        let stats = cache.stats();
        assert_eq!(stats.count_misses, 0);
        assert_eq!(stats.earliest_misses, 0);
        assert_eq!(stats.syncs, 1);
    }

    #[tokio::test]
    async fn test_sync_skips_index_records() {
        let store = MemoryStore::new();
        put_message(&store, &message(MessageType::ReactionAdd, 4, 1)).await.unwrap();
        let mut index_key = crate::keys::make_user_key(Fid::new(4));
        index_key.extend_from_slice(&[90, 1, 2, 3]);
        store
            .commit(Transaction::new().put(index_key, vec![]))
            .await
            .unwrap();

        let cache = cache(&store);
        cache.sync_from_db().await.unwrap();
        assert_eq!(cache.stats().cached_counts, 1);
    }

    #[tokio::test]
    async fn test_sync_fails_on_corrupt_key_and_keeps_state() {
        let store = MemoryStore::new();
        let fid = Fid::new(2);
        put_message(&store, &message(MessageType::CastAdd, 2, 1)).await.unwrap();

        let cache = cache(&store);
        cache.sync_from_db().await.unwrap();

        let mut bad = make_message_primary_key(fid, UserPostfix::CastMessage, &message(MessageType::CastAdd, 2, 9).ts_hash());
        bad.truncate(20);
        store.commit(Transaction::new().put(bad, vec![])).await.unwrap();

        let err = cache.sync_from_db().await.unwrap_err();
        assert!(matches!(err, HubError::Storage(StorageError::CorruptKey { .. })));
        assert!(cache.state.read().unwrap().sync_journal.is_none());
        assert_eq!(cache.get_message_count(fid, UserPostfix::CastMessage).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_earliest_lookup_leaves_count_stats_alone() {
        let store = MemoryStore::new();
        let only = message(MessageType::LinkAdd, 12, 40);
        put_message(&store, &only).await.unwrap();
        let cache = cache(&store);
        let fid = Fid::new(12);

        assert_eq!(
            cache.get_earliest_ts_hash(fid, UserPostfix::LinkMessage).await.unwrap(),
            Some(only.ts_hash())
        );
        assert_eq!(
            cache.get_earliest_ts_hash(fid, UserPostfix::LinkMessage).await.unwrap(),
            Some(only.ts_hash())
        );
        assert_eq!(cache.get_earliest_ts_hash(fid, UserPostfix::CastMessage).await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.count_hits, 0);
        assert_eq!(stats.count_misses, 0);
        assert_eq!(stats.earliest_misses, 1);
        assert_eq!(stats.earliest_hits, 1);
        assert_eq!(cache.coalesce_metrics().counts.leader_count, 2);
    }

    #[tokio::test]
    async fn test_merge_updates_count_and_earliest() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let fid = Fid::new(3);

        assert_eq!(cache.get_message_count(fid, UserPostfix::CastMessage).await.unwrap(), 0);
        let middle = message(MessageType::CastAdd, 3, 100);
        cache.process_event(&HubEvent::merge_message(1, middle.clone(), vec![])).unwrap();
        assert_eq!(cache.get_message_count(fid, UserPostfix::CastMessage).await.unwrap(), 1);
        assert_eq!(
            cache.get_earliest_ts_hash(fid, UserPostfix::CastMessage).await.unwrap(),
            Some(middle.ts_hash())
        );

        let earlier = message(MessageType::CastAdd, 3, 90);
        cache.process_event(&HubEvent::merge_message(2, earlier.clone(), vec![])).unwrap();
        assert_eq!(
            cache.get_earliest_ts_hash(fid, UserPostfix::CastMessage).await.unwrap(),
            Some(earlier.ts_hash())
        );
    }

    #[tokio::test]
    async fn test_count_underflow_drops_entry() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        let fid = Fid::new(5);
        let ghost = message(MessageType::ReactionAdd, 5, 7);

        assert_eq!(cache.get_message_count(fid, UserPostfix::ReactionMessage).await.unwrap(), 0);
        cache.process_event(&HubEvent::prune_message(1, ghost)).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.inconsistent_events, 1);
        assert_eq!(stats.cached_counts, 0);

        // Re-resolved from the store on next query.
        assert_eq!(cache.get_message_count(fid, UserPostfix::ReactionMessage).await.unwrap(), 0);
        assert_eq!(cache.stats().count_misses, 2);
    }

    #[tokio::test]
    async fn test_malformed_event_rejected_without_mutation() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        cache.sync_from_db().await.unwrap();

        let mut bad = rent(6, 1, 1_800_000_000, 2);
        bad.body = OnChainEventBody::Signer(SignerEventBody { key: vec![0] });
        let err = cache
            .process_event(&HubEvent::merge_on_chain_event(1, bad))
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(ValidationError::BodyMismatch { .. })));

        let err = cache
            .process_event(&HubEvent::merge_on_chain_event(2, rent(6, 2, 1_800_000_000, 0)))
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(ValidationError::InvalidValue { .. })));

        let stats = cache.stats();
        assert_eq!(stats.rejected_events, 2);
        assert_eq!(stats.events_processed, 0);
        assert_eq!(stats.mirrored_fids, 0);
    }

    #[tokio::test]
    async fn test_rent_event_and_lazy_ledger_load() {
        let store = MemoryStore::new();
        let now = 1_800_000_000;
        let clock = Arc::new(ManualClock::at_unix_secs(now));
        let cache = StorageCache::new(
            Arc::new(store.clone()),
            StorageCacheConfig::default(),
            clock,
        );
        let fid = Fid::new(8);

        let first = rent(8, 10, now - 100, 2);
        put_on_chain_event(&store, &first).await.unwrap();

        // Not mirrored yet: the event is left for the lazy load.
        cache
            .process_event(&HubEvent::merge_on_chain_event(1, first.clone()))
            .unwrap();
        assert_eq!(cache.stats().mirrored_fids, 0);

        let slot = cache.get_current_storage_slot_for_fid(fid).await.unwrap();
        assert_eq!(slot.units, 2);
        assert_eq!(cache.stats().mirrored_fids, 1);

        // Mirrored now: events append, duplicates are ignored.
        cache
            .process_event(&HubEvent::merge_on_chain_event(2, first))
            .unwrap();
        cache
            .process_event(&HubEvent::merge_on_chain_event(3, rent(8, 11, now - 50, 3)))
            .unwrap();
        let slot = cache.get_current_storage_slot_for_fid(fid).await.unwrap();
        assert_eq!(slot.units, 5);
        assert_eq!(cache.coalesce_metrics().ledgers.leader_count, 1);
    }

    #[tokio::test]
    async fn test_synced_cache_answers_empty_slot_without_scan() {
        let store = MemoryStore::new();
        let cache = cache(&store);
        cache.sync_from_db().await.unwrap();
        let slot = cache.get_current_storage_slot_for_fid(Fid::new(99)).await.unwrap();
        assert!(slot.is_empty());
        assert_eq!(cache.coalesce_metrics().ledgers.leader_count, 0);
    }

    #[test]
    fn test_install_replays_journaled_events() {
        let mut state = CacheState {
            sync_journal: Some(SyncJournal::default()),
            ..CacheState::default()
        };
        let scanned_first = message(MessageType::CastAdd, 1, 5);
        let added = message(MessageType::CastAdd, 1, 10);
        let other = message(MessageType::LinkAdd, 1, 3);
        let key = CacheKey::of(&added);

        state.add_message(&added);
        state.add_message(&other);
        state.remove_message(&scanned_first).unwrap();
        assert!(!state.add_rental(Fid::new(2), Rental::from_event(&rent(2, 7, 1_800_000_000, 1)).unwrap()));

        let counts = HashMap::from([(key, 3), (CacheKey::new(Fid::new(1), UserPostfix::ReactionMessage), 4)]);
        let earliest = HashMap::from([(key, EarliestEntry::Known(scanned_first.ts_hash()))]);
        let replayed = state.install_sync(counts, earliest, HashMap::new());

        assert_eq!(replayed, 4);
        assert!(state.sync_journal.is_none());
        assert!(state.synced);
        // Journaled keys are re-read; untouched keys keep the scanned value.
        assert!(!state.counts.contains_key(&key));
        assert_eq!(
            state.counts.get(&CacheKey::new(Fid::new(1), UserPostfix::ReactionMessage)),
            Some(&4)
        );
        assert_eq!(state.earliest.get(&key), None);
        assert_eq!(
            state.earliest.get(&CacheKey::of(&other)),
            Some(&EarliestEntry::Known(other.ts_hash()))
        );
        assert_eq!(state.ledgers.get(&Fid::new(2)).map(RentalLedger::len), Some(1));

        // Closed journal: later events are applied directly.
        state.add_message(&scanned_first);
        assert!(state.sync_journal.is_none());
    }

    #[test]
    fn test_scan_tracker_marks_touched_keys() {
        let mut tracker: ScanTracker<u32> = ScanTracker::default();
        tracker.begin(1);
        tracker.begin(2);
        tracker.touch(&2);
        tracker.touch(&3);
        assert!(!tracker.finish(&1));
        assert!(tracker.finish(&2));
        assert!(tracker.finish(&3));
    }

    #[test]
    fn test_remove_unsets_only_matching_earliest() {
        let mut state = CacheState::default();
        let first = message(MessageType::ReactionAdd, 1, 10);
        let later = message(MessageType::ReactionAdd, 1, 20);
        let key = CacheKey::of(&first);
        state.counts.insert(key, 2);
        state.earliest.insert(key, EarliestEntry::Known(first.ts_hash()));

        state.remove_message(&later).unwrap();
        assert_eq!(state.earliest.get(&key), Some(&EarliestEntry::Known(first.ts_hash())));
        assert_eq!(state.counts.get(&key), Some(&1));

        state.remove_message(&first).unwrap();
        assert_eq!(state.earliest.get(&key), None);
        assert_eq!(state.counts.get(&key), Some(&0));

        let err = state.remove_message(&first).unwrap_err();
        assert_eq!(
            err,
            EventError::CountUnderflow {
                fid: Fid::new(1),
                postfix: UserPostfix::ReactionMessage
            }
        );
        assert!(!state.counts.contains_key(&key));
    }
}
