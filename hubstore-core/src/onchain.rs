//! On-chain events mirrored into the hub (registrations, signers, storage rent).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HubResult, ValidationError};
use crate::identity::Fid;

/// On-chain event type, with protocol discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OnChainEventType {
    Signer = 1,
    SignerMigrated = 2,
    IdRegister = 3,
    StorageRent = 4,
}

impl OnChainEventType {
    /// Byte written into store keys.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Signer),
            2 => Some(Self::SignerMigrated),
            3 => Some(Self::IdRegister),
            4 => Some(Self::StorageRent),
            _ => None,
        }
    }
}

impl fmt::Display for OnChainEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signer => "Signer",
            Self::SignerMigrated => "SignerMigrated",
            Self::IdRegister => "IdRegister",
            Self::StorageRent => "StorageRent",
        };
        f.write_str(name)
    }
}

/// Storage rent payload: how many units the fid rented in this transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRentEventBody {
    pub units: u32,
}

/// Signer add/remove payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerEventBody {
    pub key: Vec<u8>,
}

/// Fid registration/transfer payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRegisterEventBody {
    /// Custody address, hex encoded.
    pub to: String,
}

/// Type-specific payload of an on-chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnChainEventBody {
    Signer(SignerEventBody),
    SignerMigrated,
    IdRegister(IdRegisterEventBody),
    StorageRent(StorageRentEventBody),
}

impl OnChainEventBody {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Signer(_) => "Signer",
            Self::SignerMigrated => "SignerMigrated",
            Self::IdRegister(_) => "IdRegister",
            Self::StorageRent(_) => "StorageRent",
        }
    }
}

/// An event observed on chain and committed to the hub's store.
///
/// `(block_number, log_index)` identifies the event uniquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainEvent {
    pub event_type: OnChainEventType,
    pub chain_id: u32,
    pub block_number: u64,
    /// Unix seconds.
    pub block_timestamp: u64,
    pub log_index: u32,
    pub fid: Fid,
    pub body: OnChainEventBody,
}

impl OnChainEvent {
    /// Storage rent payload, if this is a storage rent event.
    pub fn storage_rent_body(&self) -> Option<&StorageRentEventBody> {
        match (&self.event_type, &self.body) {
            (OnChainEventType::StorageRent, OnChainEventBody::StorageRent(body)) => Some(body),
            _ => None,
        }
    }

    /// Check that the declared type matches the payload, and that rent events
    /// rent at least one unit.
    pub fn validate(&self) -> HubResult<()> {
        let matches = matches!(
            (&self.event_type, &self.body),
            (OnChainEventType::Signer, OnChainEventBody::Signer(_))
                | (OnChainEventType::SignerMigrated, OnChainEventBody::SignerMigrated)
                | (OnChainEventType::IdRegister, OnChainEventBody::IdRegister(_))
                | (OnChainEventType::StorageRent, OnChainEventBody::StorageRent(_))
        );
        if !matches {
            return Err(ValidationError::BodyMismatch {
                expected: self.event_type.to_string(),
                got: self.body.kind_name().to_string(),
            }
            .into());
        }
        if let OnChainEventBody::StorageRent(body) = &self.body {
            if body.units == 0 {
                return Err(ValidationError::InvalidValue {
                    field: "storage_rent.units".to_string(),
                    reason: "a rental must cover at least one unit".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HubError;

    fn rent(units: u32) -> OnChainEvent {
        OnChainEvent {
            event_type: OnChainEventType::StorageRent,
            chain_id: 10,
            block_number: 100,
            block_timestamp: 1_700_000_000,
            log_index: 0,
            fid: Fid::new(1),
            body: OnChainEventBody::StorageRent(StorageRentEventBody { units }),
        }
    }

    #[test]
    fn test_storage_rent_body_accessor() {
        let event = rent(3);
        assert_eq!(event.storage_rent_body().map(|b| b.units), Some(3));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_body() {
        let mut event = rent(1);
        event.body = OnChainEventBody::Signer(SignerEventBody { key: vec![1] });
        assert!(event.storage_rent_body().is_none());
        let err = event.validate().unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::BodyMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_units() {
        let err = rent(0).validate().unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::InvalidValue { .. })
        ));
    }
}
