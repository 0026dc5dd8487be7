//! Hub events: the ordered stream of state changes emitted after the store commits.

use serde::{Deserialize, Serialize};

use crate::error::HubResult;
use crate::identity::Fid;
use crate::message::Message;
use crate::onchain::OnChainEvent;

/// Hub event kind, with protocol discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HubEventType {
    MergeMessage = 1,
    PruneMessage = 2,
    RevokeMessage = 3,
    MergeUsernameProof = 6,
    MergeOnChainEvent = 9,
}

/// Payload of a hub event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubEventBody {
    /// A message was added. Conflicting messages it displaced are listed in
    /// `deleted_messages`.
    MergeMessage {
        message: Message,
        deleted_messages: Vec<Message>,
    },
    /// A message was removed to keep the fid within its storage limit.
    PruneMessage { message: Message },
    /// A message was removed because its signer was revoked.
    RevokeMessage { message: Message },
    /// A username proof was merged.
    MergeUsernameProof { fid: Fid, name: String },
    /// An on-chain event was committed.
    MergeOnChainEvent { on_chain_event: OnChainEvent },
}

/// A state-change notification, delivered in `id` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEvent {
    pub id: u64,
    pub body: HubEventBody,
}

impl HubEvent {
    pub fn merge_message(id: u64, message: Message, deleted_messages: Vec<Message>) -> Self {
        Self {
            id,
            body: HubEventBody::MergeMessage {
                message,
                deleted_messages,
            },
        }
    }

    pub fn prune_message(id: u64, message: Message) -> Self {
        Self {
            id,
            body: HubEventBody::PruneMessage { message },
        }
    }

    pub fn revoke_message(id: u64, message: Message) -> Self {
        Self {
            id,
            body: HubEventBody::RevokeMessage { message },
        }
    }

    pub fn merge_on_chain_event(id: u64, on_chain_event: OnChainEvent) -> Self {
        Self {
            id,
            body: HubEventBody::MergeOnChainEvent { on_chain_event },
        }
    }

    /// Kind of this event.
    pub fn event_type(&self) -> HubEventType {
        match self.body {
            HubEventBody::MergeMessage { .. } => HubEventType::MergeMessage,
            HubEventBody::PruneMessage { .. } => HubEventType::PruneMessage,
            HubEventBody::RevokeMessage { .. } => HubEventType::RevokeMessage,
            HubEventBody::MergeUsernameProof { .. } => HubEventType::MergeUsernameProof,
            HubEventBody::MergeOnChainEvent { .. } => HubEventType::MergeOnChainEvent,
        }
    }

    /// Structural checks on the payload. Message content is not inspected.
    pub fn validate(&self) -> HubResult<()> {
        match &self.body {
            HubEventBody::MergeOnChainEvent { on_chain_event } => on_chain_event.validate(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageData, MessageType};
    use crate::onchain::{OnChainEventBody, OnChainEventType, SignerEventBody};

    fn cast() -> Message {
        Message::new(MessageData {
            message_type: MessageType::CastAdd,
            fid: Fid::new(3),
            timestamp: 10,
            body: vec![],
        })
    }

    #[test]
    fn test_event_type_follows_body() {
        assert_eq!(
            HubEvent::merge_message(1, cast(), vec![]).event_type(),
            HubEventType::MergeMessage
        );
        assert_eq!(
            HubEvent::prune_message(2, cast()).event_type(),
            HubEventType::PruneMessage
        );
        assert_eq!(
            HubEvent::revoke_message(3, cast()).event_type(),
            HubEventType::RevokeMessage
        );
    }

    #[test]
    fn test_validate_checks_on_chain_payload() {
        let bad = OnChainEvent {
            event_type: OnChainEventType::StorageRent,
            chain_id: 10,
            block_number: 1,
            block_timestamp: 1,
            log_index: 0,
            fid: Fid::new(3),
            body: OnChainEventBody::Signer(SignerEventBody { key: vec![] }),
        };
        assert!(HubEvent::merge_on_chain_event(4, bad).validate().is_err());
        assert!(HubEvent::prune_message(5, cast()).validate().is_ok());
    }
}
