//! Message types and the message-category (postfix) namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::{Fid, MessageHash, TsHash};

/// Highest postfix byte used for message records. Bytes above this value are
/// index records sharing the same per-fid key namespace.
pub const USER_MESSAGE_POSTFIX_MAX: u8 = 85;

/// Message type, with protocol discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    CastAdd = 1,
    CastRemove = 2,
    ReactionAdd = 3,
    ReactionRemove = 4,
    LinkAdd = 5,
    LinkRemove = 6,
    VerificationAddEthAddress = 7,
    VerificationRemove = 8,
    UserDataAdd = 11,
    UsernameProof = 12,
    LinkCompactState = 14,
}

impl MessageType {
    /// Protocol discriminant.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Message category tag used as the per-fid key prefix in the store.
///
/// Add and remove messages of the same kind share a category, so a cast remove
/// counts against the same budget as a cast add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UserPostfix {
    CastMessage = 1,
    LinkMessage = 2,
    ReactionMessage = 3,
    VerificationMessage = 4,
    // 5 was the retired signer message set.
    UserDataMessage = 6,
    UsernameProofMessage = 7,
    LinkCompactStateMessage = 14,
}

impl UserPostfix {
    /// Every message category, in byte order.
    pub const ALL: [UserPostfix; 7] = [
        UserPostfix::CastMessage,
        UserPostfix::LinkMessage,
        UserPostfix::ReactionMessage,
        UserPostfix::VerificationMessage,
        UserPostfix::UserDataMessage,
        UserPostfix::UsernameProofMessage,
        UserPostfix::LinkCompactStateMessage,
    ];

    /// Byte written into store keys.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a postfix byte. Returns `None` for index postfixes and unassigned values.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::CastMessage),
            2 => Some(Self::LinkMessage),
            3 => Some(Self::ReactionMessage),
            4 => Some(Self::VerificationMessage),
            6 => Some(Self::UserDataMessage),
            7 => Some(Self::UsernameProofMessage),
            14 => Some(Self::LinkCompactStateMessage),
            _ => None,
        }
    }

    /// Whether a postfix byte falls in the message-record range.
    pub const fn is_message_byte(byte: u8) -> bool {
        byte > 0 && byte <= USER_MESSAGE_POSTFIX_MAX
    }
}

impl From<MessageType> for UserPostfix {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::CastAdd | MessageType::CastRemove => Self::CastMessage,
            MessageType::ReactionAdd | MessageType::ReactionRemove => Self::ReactionMessage,
            MessageType::LinkAdd | MessageType::LinkRemove => Self::LinkMessage,
            MessageType::VerificationAddEthAddress | MessageType::VerificationRemove => {
                Self::VerificationMessage
            }
            MessageType::UserDataAdd => Self::UserDataMessage,
            MessageType::UsernameProof => Self::UsernameProofMessage,
            MessageType::LinkCompactState => Self::LinkCompactStateMessage,
        }
    }
}

impl fmt::Display for UserPostfix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CastMessage => "Cast",
            Self::LinkMessage => "Link",
            Self::ReactionMessage => "Reaction",
            Self::VerificationMessage => "Verification",
            Self::UserDataMessage => "UserData",
            Self::UsernameProofMessage => "UsernameProof",
            Self::LinkCompactStateMessage => "LinkCompactState",
        };
        f.write_str(name)
    }
}

/// Signed message payload.
///
/// The body is kept as opaque encoded bytes; only the envelope fields matter
/// to storage accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub message_type: MessageType,
    pub fid: Fid,
    /// Seconds since the protocol epoch.
    pub timestamp: u32,
    pub body: Vec<u8>,
}

impl MessageData {
    /// Canonical byte encoding that the message hash is computed over.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + 8 + 4 + self.body.len());
        bytes.push(self.message_type.as_byte());
        bytes.extend_from_slice(&self.fid.to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// A message with its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub data: MessageData,
    pub hash: MessageHash,
}

impl Message {
    /// Build a message, computing its hash from the data.
    pub fn new(data: MessageData) -> Self {
        let hash = MessageHash::digest(&data.encode());
        Self { data, hash }
    }

    /// Owning account.
    pub fn fid(&self) -> Fid {
        self.data.fid
    }

    /// Category this message is stored and counted under.
    pub fn postfix(&self) -> UserPostfix {
        self.data.message_type.into()
    }

    /// Position of this message for earliest-ness comparisons.
    pub fn ts_hash(&self) -> TsHash {
        TsHash::new(self.data.timestamp, self.hash)
    }
}
