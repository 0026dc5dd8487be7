//! Storage lease rules and the derived storage slot.
//!
//! Rentals made before the cutover keep the original two-year lease and are
//! reported as legacy units. Rentals at or after the cutover get a one-year
//! lease. Each rental expires on its own schedule.

use serde::{Deserialize, Serialize};

/// Block timestamp (Unix seconds) at which the one-year lease took effect:
/// 2024-08-29T00:00:00Z.
pub const LEGACY_STORAGE_UNIT_CUTOFF_TIMESTAMP: u64 = 1_724_889_600;

/// 365 days.
pub const ONE_YEAR_IN_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Lease length for rentals before the cutover.
pub const LEGACY_RENT_PERIOD_SECS: u64 = 2 * ONE_YEAR_IN_SECONDS;

/// Lease length for rentals at or after the cutover.
pub const RENT_PERIOD_SECS: u64 = ONE_YEAR_IN_SECONDS;

/// Which lease rule a rental falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseKind {
    Legacy,
    Current,
}

/// The lease rules in force: cutover instant and the two lease lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSchedule {
    pub cutoff_timestamp: u64,
    pub legacy_period_secs: u64,
    pub period_secs: u64,
}

impl Default for LeaseSchedule {
    fn default() -> Self {
        Self {
            cutoff_timestamp: LEGACY_STORAGE_UNIT_CUTOFF_TIMESTAMP,
            legacy_period_secs: LEGACY_RENT_PERIOD_SECS,
            period_secs: RENT_PERIOD_SECS,
        }
    }
}

impl LeaseSchedule {
    /// Lease rule for a rental made at `block_timestamp`.
    pub fn kind_for(&self, block_timestamp: u64) -> LeaseKind {
        if block_timestamp < self.cutoff_timestamp {
            LeaseKind::Legacy
        } else {
            LeaseKind::Current
        }
    }

    /// First instant at which a rental made at `block_timestamp` no longer counts.
    pub fn expiry_for(&self, block_timestamp: u64) -> u64 {
        let period = match self.kind_for(block_timestamp) {
            LeaseKind::Legacy => self.legacy_period_secs,
            LeaseKind::Current => self.period_secs,
        };
        block_timestamp.saturating_add(period)
    }

    /// Whether a rental made at `block_timestamp` is active at `now`.
    pub fn is_active(&self, block_timestamp: u64, now: u64) -> bool {
        now < self.expiry_for(block_timestamp)
    }
}

/// Storage entitlement of one fid at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlot {
    /// Active units rented before the cutover.
    pub legacy_units: u64,
    /// Active units rented at or after the cutover.
    pub units: u64,
    /// Unix seconds at which the next active rental expires; 0 when none is active.
    pub invalidate_at: u64,
}

impl StorageSlot {
    /// Total active units under either rule.
    pub fn total_units(&self) -> u64 {
        self.legacy_units + self.units
    }

    /// True when the fid has no active storage.
    pub fn is_empty(&self) -> bool {
        self.total_units() == 0
    }
}
