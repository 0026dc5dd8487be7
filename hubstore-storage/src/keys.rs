//! Store key layout.
//!
//! # Binary Format
//!
//! Message primary keys (34 bytes):
//! - Byte 0: [`RootPrefix::User`]
//! - Bytes 1-8: fid (big-endian u64)
//! - Byte 9: postfix ([`UserPostfix`] byte; values above 85 are index records)
//! - Bytes 10-33: ts_hash (big-endian timestamp, then hash)
//!
//! On-chain event primary keys (22 bytes):
//! - Byte 0: [`RootPrefix::OnChainEvent`]
//! - Byte 1: event type
//! - Bytes 2-9: fid (big-endian u64)
//! - Bytes 10-17: block number (big-endian u64)
//! - Bytes 18-21: log index (big-endian u32)
//!
//! Every multi-byte field is big-endian so prefix scans return keys in
//! numeric order.

use hubstore_core::{
    Fid, HubResult, OnChainEvent, OnChainEventType, StorageError, TsHash, UserPostfix, FID_BYTES,
    TS_HASH_LENGTH,
};

/// First byte of every key; partitions the store into namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RootPrefix {
    User = 1,
    OnChainEvent = 26,
}

/// Length of `[root][fid]`.
pub const USER_PREFIX_LENGTH: usize = 1 + FID_BYTES;

/// Length of `[root][fid][postfix]`.
pub const MESSAGE_PREFIX_LENGTH: usize = USER_PREFIX_LENGTH + 1;

/// Length of a full message primary key.
pub const MESSAGE_PRIMARY_KEY_LENGTH: usize = MESSAGE_PREFIX_LENGTH + TS_HASH_LENGTH;

/// Length of a full on-chain event primary key.
pub const ON_CHAIN_EVENT_KEY_LENGTH: usize = 1 + 1 + FID_BYTES + 8 + 4;

fn corrupt(key: &[u8], reason: impl Into<String>) -> StorageError {
    StorageError::CorruptKey {
        key: hex::encode(key),
        reason: reason.into(),
    }
}

// ============================================================================
// MESSAGE KEYS
// ============================================================================

/// Prefix covering every per-fid record.
pub fn user_root_prefix() -> Vec<u8> {
    vec![RootPrefix::User as u8]
}

/// `[User][fid]`
pub fn make_user_key(fid: Fid) -> Vec<u8> {
    let mut key = Vec::with_capacity(USER_PREFIX_LENGTH);
    key.push(RootPrefix::User as u8);
    key.extend_from_slice(&fid.to_be_bytes());
    key
}

/// `[User][fid][postfix]`: every message of one category for one fid.
pub fn make_message_prefix(fid: Fid, postfix: UserPostfix) -> Vec<u8> {
    let mut key = make_user_key(fid);
    key.push(postfix.as_byte());
    key
}

/// `[User][fid][postfix][ts_hash]`
pub fn make_message_primary_key(fid: Fid, postfix: UserPostfix, ts_hash: &TsHash) -> Vec<u8> {
    let mut key = make_message_prefix(fid, postfix);
    key.extend_from_slice(&ts_hash.encode());
    key
}

/// Decoded message primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub fid: Fid,
    pub postfix: UserPostfix,
    pub ts_hash: TsHash,
}

/// Decode a key found under [`user_root_prefix`].
///
/// Returns `Ok(None)` for records that are not messages of a known category
/// (index postfixes, retired postfixes). A message-category key with the wrong
/// shape is a [`StorageError::CorruptKey`].
pub fn parse_user_key(key: &[u8]) -> HubResult<Option<MessageKey>> {
    if key.len() < MESSAGE_PREFIX_LENGTH {
        return Err(corrupt(key, "shorter than [root][fid][postfix]").into());
    }
    if key[0] != RootPrefix::User as u8 {
        return Err(corrupt(key, "not under the user root").into());
    }

    let postfix_byte = key[USER_PREFIX_LENGTH];
    if !UserPostfix::is_message_byte(postfix_byte) {
        return Ok(None);
    }
    let Some(postfix) = UserPostfix::from_byte(postfix_byte) else {
        return Ok(None);
    };

    if key.len() != MESSAGE_PRIMARY_KEY_LENGTH {
        return Err(corrupt(
            key,
            format!(
                "message key must be {} bytes, got {}",
                MESSAGE_PRIMARY_KEY_LENGTH,
                key.len()
            ),
        )
        .into());
    }

    let fid = Fid::from_be_slice(&key[1..USER_PREFIX_LENGTH])
        .ok_or_else(|| corrupt(key, "unreadable fid"))?;
    let ts_hash = TsHash::decode(&key[MESSAGE_PREFIX_LENGTH..])
        .map_err(|e| corrupt(key, e.to_string()))?;

    Ok(Some(MessageKey {
        fid,
        postfix,
        ts_hash,
    }))
}

/// Extract the ts_hash from a key known to sit under a message prefix.
pub fn parse_message_ts_hash(key: &[u8]) -> HubResult<TsHash> {
    if key.len() != MESSAGE_PRIMARY_KEY_LENGTH {
        return Err(corrupt(
            key,
            format!(
                "message key must be {} bytes, got {}",
                MESSAGE_PRIMARY_KEY_LENGTH,
                key.len()
            ),
        )
        .into());
    }
    TsHash::decode(&key[MESSAGE_PREFIX_LENGTH..]).map_err(|e| corrupt(key, e.to_string()).into())
}

// ============================================================================
// ON-CHAIN EVENT KEYS
// ============================================================================

/// `[OnChainEvent][type]`: every event of one type.
pub fn make_on_chain_event_type_prefix(event_type: OnChainEventType) -> Vec<u8> {
    vec![RootPrefix::OnChainEvent as u8, event_type.as_byte()]
}

/// `[OnChainEvent][type][fid]`: every event of one type for one fid.
pub fn make_on_chain_event_fid_prefix(event_type: OnChainEventType, fid: Fid) -> Vec<u8> {
    let mut key = make_on_chain_event_type_prefix(event_type);
    key.extend_from_slice(&fid.to_be_bytes());
    key
}

/// `[OnChainEvent][type][fid][block number][log index]`
pub fn make_on_chain_event_primary_key(event: &OnChainEvent) -> Vec<u8> {
    let mut key = make_on_chain_event_fid_prefix(event.event_type, event.fid);
    key.extend_from_slice(&event.block_number.to_be_bytes());
    key.extend_from_slice(&event.log_index.to_be_bytes());
    key
}

/// Decoded on-chain event primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnChainEventKey {
    pub event_type: OnChainEventType,
    pub fid: Fid,
    pub block_number: u64,
    pub log_index: u32,
}

/// Decode an on-chain event primary key.
pub fn parse_on_chain_event_key(key: &[u8]) -> HubResult<OnChainEventKey> {
    if key.len() != ON_CHAIN_EVENT_KEY_LENGTH {
        return Err(corrupt(
            key,
            format!(
                "on-chain event key must be {} bytes, got {}",
                ON_CHAIN_EVENT_KEY_LENGTH,
                key.len()
            ),
        )
        .into());
    }
    if key[0] != RootPrefix::OnChainEvent as u8 {
        return Err(corrupt(key, "not under the on-chain event root").into());
    }
    let event_type =
        OnChainEventType::from_byte(key[1]).ok_or_else(|| corrupt(key, "unknown event type"))?;
    let fid = Fid::from_be_slice(&key[2..10]).ok_or_else(|| corrupt(key, "unreadable fid"))?;

    let mut block = [0u8; 8];
    block.copy_from_slice(&key[10..18]);
    let mut log = [0u8; 4];
    log.copy_from_slice(&key[18..22]);

    Ok(OnChainEventKey {
        event_type,
        fid,
        block_number: u64::from_be_bytes(block),
        log_index: u32::from_be_bytes(log),
    })
}
