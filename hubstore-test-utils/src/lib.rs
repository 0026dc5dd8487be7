//! Hubstore Test Utilities
//!
//! Shared test infrastructure for the hubstore workspace:
//! - A counting/failing store wrapper for observing cache behavior
//! - Proptest generators for messages, keys and events
//! - Fixtures for messages and on-chain events with unique identities
//! - Custom assertions for hubstore error variants

pub use hubstore_core::{
    Fid, HubError, HubEvent, HubResult, Message, MessageData, MessageType, OnChainEvent,
    OnChainEventBody, OnChainEventType, StorageError, StorageRentEventBody, TsHash, UserPostfix,
    ValidationError,
};
pub use hubstore_storage::{KvStore, MemoryStore, ScanVisitor, Transaction};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Filtered by `RUST_LOG`; silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// COUNTING STORE
// ============================================================================

/// [`KvStore`] wrapper that counts reads and can delay or fail them.
///
/// Writes always pass straight through.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    count_calls: AtomicU64,
    scan_calls: AtomicU64,
    delay_ms: AtomicU64,
    failing: AtomicBool,
}

impl<S: KvStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            count_calls: AtomicU64::new(0),
            scan_calls: AtomicU64::new(0),
            delay_ms: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Delay every read by `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Make every read fail with an I/O error until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of `count_keys_at_prefix` calls.
    pub fn count_calls(&self) -> u64 {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Number of `scan_prefix` calls.
    pub fn scan_calls(&self) -> u64 {
        self.scan_calls.load(Ordering::SeqCst)
    }

    async fn before_read(&self) -> HubResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KvStore> KvStore for CountingStore<S> {
    async fn get(&self, key: &[u8]) -> HubResult<Option<Vec<u8>>> {
        self.before_read().await?;
        self.inner.get(key).await
    }

    async fn count_keys_at_prefix(&self, prefix: &[u8]) -> HubResult<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        self.inner.count_keys_at_prefix(prefix).await
    }

    async fn scan_prefix(&self, prefix: &[u8], visitor: &mut ScanVisitor<'_>) -> HubResult<()> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        self.inner.scan_prefix(prefix, visitor).await
    }

    async fn commit(&self, txn: Transaction) -> HubResult<()> {
        self.inner.commit(txn).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for hubstore types.

    use super::*;
    use hubstore_core::MessageHash;
    use proptest::prelude::*;

    pub fn arb_fid() -> impl Strategy<Value = Fid> {
        (1u64..1_000_000).prop_map(Fid::new)
    }

    pub fn arb_message_type() -> impl Strategy<Value = MessageType> {
        prop_oneof![
            Just(MessageType::CastAdd),
            Just(MessageType::CastRemove),
            Just(MessageType::ReactionAdd),
            Just(MessageType::ReactionRemove),
            Just(MessageType::LinkAdd),
            Just(MessageType::LinkRemove),
            Just(MessageType::VerificationAddEthAddress),
            Just(MessageType::VerificationRemove),
            Just(MessageType::UserDataAdd),
            Just(MessageType::UsernameProof),
            Just(MessageType::LinkCompactState),
        ]
    }

    pub fn arb_user_postfix() -> impl Strategy<Value = UserPostfix> {
        proptest::sample::select(UserPostfix::ALL.to_vec())
    }

    pub fn arb_ts_hash() -> impl Strategy<Value = TsHash> {
        (any::<u32>(), any::<[u8; 20]>())
            .prop_map(|(timestamp, hash)| TsHash::new(timestamp, MessageHash::new(hash)))
    }

    /// Messages of `fid` with arbitrary type, timestamp and body.
    pub fn arb_message(fid: Fid) -> impl Strategy<Value = Message> {
        (
            arb_message_type(),
            0u32..200_000_000,
            proptest::collection::vec(any::<u8>(), 0..32),
        )
            .prop_map(move |(message_type, timestamp, body)| {
                Message::new(MessageData {
                    message_type,
                    fid,
                    timestamp,
                    body,
                })
            })
    }

    /// Storage rent events of `fid` within `[from, to)` Unix seconds.
    pub fn arb_storage_rent_event(fid: Fid, from: u64, to: u64) -> impl Strategy<Value = OnChainEvent> {
        (any::<u32>(), 0u32..64, from..to, 1u32..10).prop_map(
            move |(block_number, log_index, block_timestamp, units)| OnChainEvent {
                event_type: OnChainEventType::StorageRent,
                chain_id: 10,
                block_number: u64::from(block_number),
                block_timestamp,
                log_index,
                fid,
                body: OnChainEventBody::StorageRent(StorageRentEventBody { units }),
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Builders for messages and events. Every call yields a fresh identity.

    use super::*;
    use hubstore_core::{to_farcaster_time, SignerEventBody};

    static NEXT_FID: AtomicU64 = AtomicU64::new(1_000);
    static NEXT_NONCE: AtomicU64 = AtomicU64::new(1);

    fn nonce() -> u64 {
        NEXT_NONCE.fetch_add(1, Ordering::SeqCst)
    }

    /// A fid no other fixture call has returned.
    pub fn new_fid() -> Fid {
        Fid::new(NEXT_FID.fetch_add(1, Ordering::SeqCst))
    }

    /// Current Farcaster time, for messages created "now".
    pub fn farcaster_now() -> u32 {
        to_farcaster_time(chrono::Utc::now()).unwrap_or(0)
    }

    /// Message with an explicit timestamp. The body is unique, so is the hash.
    pub fn message_at(message_type: MessageType, fid: Fid, timestamp: u32) -> Message {
        Message::new(MessageData {
            message_type,
            fid,
            timestamp,
            body: nonce().to_be_bytes().to_vec(),
        })
    }

    pub fn cast_add(fid: Fid) -> Message {
        message_at(MessageType::CastAdd, fid, farcaster_now())
    }

    pub fn cast_add_at(fid: Fid, timestamp: u32) -> Message {
        message_at(MessageType::CastAdd, fid, timestamp)
    }

    pub fn cast_remove(fid: Fid) -> Message {
        message_at(MessageType::CastRemove, fid, farcaster_now())
    }

    pub fn reaction_add(fid: Fid) -> Message {
        message_at(MessageType::ReactionAdd, fid, farcaster_now())
    }

    pub fn link_add(fid: Fid) -> Message {
        message_at(MessageType::LinkAdd, fid, farcaster_now())
    }

    pub fn verification_add(fid: Fid) -> Message {
        message_at(MessageType::VerificationAddEthAddress, fid, farcaster_now())
    }

    pub fn user_data_add(fid: Fid) -> Message {
        message_at(MessageType::UserDataAdd, fid, farcaster_now())
    }

    /// Storage rent event with a unique block number.
    pub fn storage_rent_event(fid: Fid, block_timestamp: u64, units: u32) -> OnChainEvent {
        OnChainEvent {
            event_type: OnChainEventType::StorageRent,
            chain_id: 10,
            block_number: nonce(),
            block_timestamp,
            log_index: 0,
            fid,
            body: OnChainEventBody::StorageRent(StorageRentEventBody { units }),
        }
    }

    pub fn signer_event(fid: Fid) -> OnChainEvent {
        OnChainEvent {
            event_type: OnChainEventType::Signer,
            chain_id: 10,
            block_number: nonce(),
            block_timestamp: 1_700_000_000,
            log_index: 0,
            fid,
            body: OnChainEventBody::Signer(SignerEventBody { key: vec![7; 32] }),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for hubstore error variants.

    use super::*;

    /// Assert that a HubResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a HubResult is a CorruptKey storage error.
    #[track_caller]
    pub fn assert_corrupt_key<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Storage(StorageError::CorruptKey { .. })) => {}
            other => panic!("Expected CorruptKey error, got: {:?}", other),
        }
    }

    /// Assert that a HubResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}
