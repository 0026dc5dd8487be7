//! Error types for hubstore operations

use crate::{Fid, UserPostfix};
use thiserror::Error;

/// Storage layer errors.
///
/// Every failure of the key-value store collaborator (transactions, iteration,
/// decoding of stored bytes) surfaces as one of these variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Iteration over prefix {prefix} failed: {reason}")]
    IterationFailed { prefix: String, reason: String },

    #[error("Corrupt key {key}: {reason}")]
    CorruptKey { key: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Scan for {key} ended before producing a result")]
    ScanAborted { key: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Validation errors for malformed input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid length for {field}: expected {expected} bytes, got {got}")]
    InvalidLength {
        field: String,
        expected: usize,
        got: usize,
    },

    #[error("Event body mismatch: expected {expected} body, got {got}")]
    BodyMismatch { expected: String, got: String },
}

/// Inconsistencies between the event stream and cached state.
///
/// These are diagnostics, not failures: the event processor logs them and
/// lets lazy resolution repair the affected key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Count underflow for fid {fid} postfix {postfix}: removal of a message that was never counted")]
    CountUnderflow { fid: Fid, postfix: UserPostfix },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all hubstore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for hubstore operations.
pub type HubResult<T> = Result<T, HubError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_corrupt_key() {
        let err = StorageError::CorruptKey {
            key: "01ff".to_string(),
            reason: "truncated".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt key"));
        assert!(msg.contains("01ff"));
        assert!(msg.contains("truncated"));
    }

    #[test]
    fn test_validation_error_display_invalid_length() {
        let err = ValidationError::InvalidLength {
            field: "ts_hash".to_string(),
            expected: 24,
            got: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ts_hash"));
        assert!(msg.contains("24"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_event_error_display_count_underflow() {
        let err = EventError::CountUnderflow {
            fid: Fid::new(42),
            postfix: UserPostfix::ReactionMessage,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("42"));
        assert!(msg.contains("Reaction"));
    }

    #[test]
    fn test_hub_error_wraps_storage_error() {
        let err: HubError = StorageError::LockPoisoned.into();
        assert_eq!(err, HubError::Storage(StorageError::LockPoisoned));
        assert!(format!("{}", err).starts_with("Storage error"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "rent_period_secs".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("rent_period_secs"));
        assert!(msg.contains("must be positive"));
    }
}
