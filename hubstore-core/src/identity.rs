//! Identity types: accounts, message hashes and timestamp-hash references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HubResult, ValidationError};

/// Length in bytes of a message hash (truncated blake3 digest).
pub const HASH_LENGTH: usize = 20;

/// Length in bytes of an encoded [`TsHash`]: 4-byte timestamp + hash.
pub const TS_HASH_LENGTH: usize = 4 + HASH_LENGTH;

/// Length in bytes of an encoded [`Fid`] inside store keys.
pub const FID_BYTES: usize = 8;

/// Protocol epoch (2021-01-01T00:00:00Z) in Unix seconds.
///
/// Message timestamps count seconds from this instant, not from the Unix epoch.
pub const FARCASTER_EPOCH_SECS: i64 = 1_609_459_200;

// ============================================================================
// FID
// ============================================================================

/// Account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fid(u64);

impl Fid {
    /// Create a fid from its numeric value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value of this fid.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Big-endian encoding used in store keys, so keys sort by fid.
    pub const fn to_be_bytes(self) -> [u8; FID_BYTES] {
        self.0.to_be_bytes()
    }

    /// Decode a big-endian fid. Returns `None` unless exactly 8 bytes are given.
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; FID_BYTES] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(array)))
    }
}

impl From<u64> for Fid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MESSAGE HASH
// ============================================================================

/// 20-byte message hash.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageHash([u8; HASH_LENGTH]);

impl MessageHash {
    /// Wrap raw hash bytes.
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes: blake3, truncated to [`HASH_LENGTH`].
    pub fn digest(data: &[u8]) -> Self {
        let full = blake3::hash(data);
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&full.as_bytes()[..HASH_LENGTH]);
        Self(bytes)
    }

    /// Raw hash bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Parse hash bytes from a slice of exactly [`HASH_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> HubResult<Self> {
        let array: [u8; HASH_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| ValidationError::InvalidLength {
                    field: "message_hash".to_string(),
                    expected: HASH_LENGTH,
                    got: bytes.len(),
                })?;
        Ok(Self(array))
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// ============================================================================
// TS HASH
// ============================================================================

/// A message's position for earliest-ness comparisons.
///
/// Ordered by timestamp, then hash. The 24-byte encoding (big-endian
/// timestamp followed by the hash) sorts bytewise in the same order, which is
/// what lets a prefix scan return the earliest message first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TsHash {
    // Field order matters: derived Ord compares timestamp first.
    timestamp: u32,
    hash: MessageHash,
}

impl TsHash {
    /// Build a reference from a protocol timestamp and message hash.
    pub const fn new(timestamp: u32, hash: MessageHash) -> Self {
        Self { timestamp, hash }
    }

    /// Protocol timestamp (seconds since [`FARCASTER_EPOCH_SECS`]).
    pub const fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Message hash.
    pub const fn hash(&self) -> &MessageHash {
        &self.hash
    }

    /// Encode to the 24-byte store representation.
    pub fn encode(&self) -> [u8; TS_HASH_LENGTH] {
        let mut bytes = [0u8; TS_HASH_LENGTH];
        bytes[0..4].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[4..].copy_from_slice(self.hash.as_bytes());
        bytes
    }

    /// Decode from the 24-byte store representation.
    pub fn decode(bytes: &[u8]) -> HubResult<Self> {
        if bytes.len() != TS_HASH_LENGTH {
            return Err(ValidationError::InvalidLength {
                field: "ts_hash".to_string(),
                expected: TS_HASH_LENGTH,
                got: bytes.len(),
            }
            .into());
        }
        let mut timestamp = [0u8; 4];
        timestamp.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            timestamp: u32::from_be_bytes(timestamp),
            hash: MessageHash::from_slice(&bytes[4..])?,
        })
    }
}

impl fmt::Display for TsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.hash)
    }
}

// ============================================================================
// PROTOCOL TIME
// ============================================================================

/// Convert a wall-clock instant to protocol time (seconds since the protocol epoch).
///
/// Fails for instants before the epoch or past the u32 range.
pub fn to_farcaster_time(at: DateTime<Utc>) -> HubResult<u32> {
    let secs = at.timestamp() - FARCASTER_EPOCH_SECS;
    u32::try_from(secs).map_err(|_| {
        ValidationError::InvalidValue {
            field: "timestamp".to_string(),
            reason: format!("{} is outside the protocol time range", at.to_rfc3339()),
        }
        .into()
    })
}

/// Convert protocol time back to Unix seconds.
pub fn from_farcaster_time(timestamp: u32) -> i64 {
    FARCASTER_EPOCH_SECS + i64::from(timestamp)
}
