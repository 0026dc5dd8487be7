//! Per-fid mirror of storage rent events.
//!
//! Only the rentals are kept. The storage slot is derived from them on every
//! query, because each rental expires on its own schedule.

use std::collections::BTreeMap;

use hubstore_core::{LeaseKind, LeaseSchedule, OnChainEvent, StorageSlot};

/// One storage rent event, reduced to what entitlement needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rental {
    pub block_number: u64,
    pub log_index: u32,
    /// Unix seconds.
    pub block_timestamp: u64,
    pub units: u32,
}

impl Rental {
    /// Extract a rental from a storage rent event. Other events yield `None`.
    pub fn from_event(event: &OnChainEvent) -> Option<Self> {
        let body = event.storage_rent_body()?;
        Some(Self {
            block_number: event.block_number,
            log_index: event.log_index,
            block_timestamp: event.block_timestamp,
            units: body.units,
        })
    }

    /// On-chain identity; the same event seen twice has the same id.
    pub fn id(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Every rental of one fid, keyed by on-chain identity. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RentalLedger {
    rentals: BTreeMap<(u64, u32), Rental>,
}

impl RentalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rental. Returns false if it was already recorded.
    pub fn insert(&mut self, rental: Rental) -> bool {
        match self.rentals.entry(rental.id()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(rental);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rentals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rentals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rental> {
        self.rentals.values()
    }

    /// Entitlement at `now` (Unix seconds).
    ///
    /// A rental counts while `now < block_timestamp + lease`. `invalidate_at`
    /// is the soonest expiry among counted rentals.
    pub fn slot_at(&self, schedule: &LeaseSchedule, now: u64) -> StorageSlot {
        let mut slot = StorageSlot::default();
        for rental in self.rentals.values() {
            let expiry = schedule.expiry_for(rental.block_timestamp);
            if now >= expiry {
                continue;
            }
            match schedule.kind_for(rental.block_timestamp) {
                LeaseKind::Legacy => slot.legacy_units += u64::from(rental.units),
                LeaseKind::Current => slot.units += u64::from(rental.units),
            }
            if slot.invalidate_at == 0 || expiry < slot.invalidate_at {
                slot.invalidate_at = expiry;
            }
        }
        slot
    }
}
