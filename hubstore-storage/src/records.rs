//! Stored record encoding and write helpers for messages and on-chain events.
//!
//! Values are JSON-encoded; keys follow [`crate::keys`].

use hubstore_core::{Fid, HubResult, Message, OnChainEvent, StorageError, TsHash, UserPostfix};

use crate::keys::{make_message_primary_key, make_on_chain_event_primary_key};
use crate::kv::{KvStore, Transaction};

pub fn encode_message(message: &Message) -> HubResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| {
        StorageError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

pub fn decode_message(key: &[u8], bytes: &[u8]) -> HubResult<Message> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::Deserialization {
            key: hex::encode(key),
            reason: e.to_string(),
        }
        .into()
    })
}

pub fn encode_on_chain_event(event: &OnChainEvent) -> HubResult<Vec<u8>> {
    serde_json::to_vec(event).map_err(|e| {
        StorageError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

pub fn decode_on_chain_event(key: &[u8], bytes: &[u8]) -> HubResult<OnChainEvent> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::Deserialization {
            key: hex::encode(key),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Primary key a message is stored under.
pub fn message_primary_key(message: &Message) -> Vec<u8> {
    make_message_primary_key(message.fid(), message.postfix(), &message.ts_hash())
}

/// Add a message write to `txn`.
pub fn put_message_transaction(txn: Transaction, message: &Message) -> HubResult<Transaction> {
    Ok(txn.put(message_primary_key(message), encode_message(message)?))
}

/// Add a message delete to `txn`.
pub fn delete_message_transaction(txn: Transaction, message: &Message) -> Transaction {
    txn.delete(message_primary_key(message))
}

/// Add an on-chain event write to `txn`.
pub fn put_on_chain_event_transaction(
    txn: Transaction,
    event: &OnChainEvent,
) -> HubResult<Transaction> {
    Ok(txn.put(
        make_on_chain_event_primary_key(event),
        encode_on_chain_event(event)?,
    ))
}

/// Store a single message.
pub async fn put_message<S: KvStore + ?Sized>(store: &S, message: &Message) -> HubResult<()> {
    store
        .commit(put_message_transaction(Transaction::new(), message)?)
        .await
}

/// Store a single on-chain event.
pub async fn put_on_chain_event<S: KvStore + ?Sized>(
    store: &S,
    event: &OnChainEvent,
) -> HubResult<()> {
    store
        .commit(put_on_chain_event_transaction(Transaction::new(), event)?)
        .await
}

/// Load a message by its primary key components.
pub async fn get_message<S: KvStore + ?Sized>(
    store: &S,
    fid: Fid,
    postfix: UserPostfix,
    ts_hash: &TsHash,
) -> HubResult<Option<Message>> {
    let key = make_message_primary_key(fid, postfix, ts_hash);
    match store.get(&key).await? {
        Some(bytes) => Ok(Some(decode_message(&key, &bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use hubstore_core::{HubError, MessageData, MessageType};

    fn cast(fid: u64, timestamp: u32) -> Message {
        Message::new(MessageData {
            message_type: MessageType::CastAdd,
            fid: Fid::new(fid),
            timestamp,
            body: b"hello".to_vec(),
        })
    }

    #[tokio::test]
    async fn test_put_and_get_message() {
        let store = MemoryStore::new();
        let message = cast(1, 50);
        put_message(&store, &message).await.unwrap();

        let loaded = get_message(&store, message.fid(), message.postfix(), &message.ts_hash())
            .await
            .unwrap();
        assert_eq!(loaded, Some(message));
    }

    #[tokio::test]
    async fn test_delete_message_transaction() {
        let store = MemoryStore::new();
        let message = cast(1, 50);
        put_message(&store, &message).await.unwrap();
        store
            .commit(delete_message_transaction(Transaction::new(), &message))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_decode_garbage_is_deserialization_error() {
        let err = decode_on_chain_event(&[26, 4], b"not json").unwrap_err();
        assert!(matches!(
            err,
            HubError::Storage(StorageError::Deserialization { .. })
        ));
    }
}
