//! Hubstore Core - Data Types
//!
//! Plain data types shared by the storage cache: account and message
//! identities, message categories, hub and on-chain events, lease rules,
//! clocks, configuration and errors. No I/O lives here.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod lease;
pub mod message;
pub mod onchain;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HubStoreConfig, LmdbConfig, StorageCacheConfig};
pub use error::{ConfigError, EventError, HubError, HubResult, StorageError, ValidationError};
pub use event::{HubEvent, HubEventBody, HubEventType};
pub use identity::{
    from_farcaster_time, to_farcaster_time, Fid, MessageHash, TsHash, FARCASTER_EPOCH_SECS,
    FID_BYTES, HASH_LENGTH, TS_HASH_LENGTH,
};
pub use lease::{
    LeaseKind, LeaseSchedule, StorageSlot, LEGACY_RENT_PERIOD_SECS,
    LEGACY_STORAGE_UNIT_CUTOFF_TIMESTAMP, ONE_YEAR_IN_SECONDS, RENT_PERIOD_SECS,
};
pub use message::{Message, MessageData, MessageType, UserPostfix, USER_MESSAGE_POSTFIX_MAX};
pub use onchain::{
    IdRegisterEventBody, OnChainEvent, OnChainEventBody, OnChainEventType, SignerEventBody,
    StorageRentEventBody,
};
