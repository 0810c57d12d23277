use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::{Entity, SchedulingError};

pub type SharedLedger = Arc<RwLock<CoachLedger>>;

/// Bookings, one ledger per coach. A ledger's write lock serializes every
/// booking write for that coach against its conflict checks.
#[derive(Default)]
pub struct BookingStore {
    ledgers: DashMap<Ulid, SharedLedger>,
    /// Reverse lookup: booking id → coach id.
    booking_to_coach: DashMap<Ulid, Ulid>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coach_count(&self) -> usize {
        self.ledgers.len()
    }

    pub fn ledger(&self, coach_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(coach_id).map(|e| e.value().clone())
    }

    /// Ledger for `coach_id`, created empty on first use.
    pub fn ledger_entry(&self, coach_id: Ulid) -> SharedLedger {
        self.ledgers
            .entry(coach_id)
            .or_insert_with(|| Arc::new(RwLock::new(CoachLedger::new(coach_id))))
            .clone()
    }

    pub fn ledgers(&self) -> Vec<SharedLedger> {
        self.ledgers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn coach_for(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_coach.get(booking_id).map(|e| *e.value())
    }

    /// Apply a booking event (no locking; caller holds the ledger lock).
    pub fn apply(&self, ledger: &mut CoachLedger, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                ledger.insert(booking.clone());
                self.booking_to_coach.insert(booking.id, booking.coach_id);
            }
            Event::BookingUpdated { booking } => {
                ledger.remove(booking.id);
                ledger.insert(booking.clone());
            }
            Event::BookingDeleted { id, .. } => {
                ledger.remove(*id);
                self.booking_to_coach.remove(id);
            }
            Event::WindowCreated { .. } | Event::WindowUpdated { .. } | Event::WindowDeleted { .. } => {}
        }
    }

    /// Lookup booking → coach, acquire that coach's write lock, and confirm
    /// the booking is still there once the lock is held.
    pub async fn resolve_write(
        &self,
        booking_id: Ulid,
    ) -> Result<(Booking, OwnedRwLockWriteGuard<CoachLedger>), SchedulingError> {
        let missing = || SchedulingError::not_found(Entity::Booking, booking_id);
        let coach_id = self.coach_for(&booking_id).ok_or_else(missing)?;
        let ledger = self.ledger(&coach_id).ok_or_else(missing)?;
        let guard = ledger.write_owned().await;
        let booking = guard.get(booking_id).cloned().ok_or_else(missing)?;
        Ok((booking, guard))
    }

    pub async fn get(&self, booking_id: Ulid) -> Option<Booking> {
        let ledger = self.ledger(&self.coach_for(&booking_id)?)?;
        let guard = ledger.read().await;
        guard.get(booking_id).cloned()
    }

    /// Conflict check under a read lock. Authoritative only while the caller
    /// also holds the write lock; otherwise it is advisory.
    pub async fn has_conflict(
        &self,
        coach_id: Ulid,
        date: chrono::NaiveDate,
        slot: &TimeSlot,
        exclude: Option<Ulid>,
    ) -> bool {
        let Some(ledger) = self.ledger(&coach_id) else {
            return false;
        };
        let guard = ledger.read().await;
        super::conflict::find_conflict(&guard, date, slot, exclude).is_some()
    }

    /// Every booking matching `keep`, in chronological order.
    pub async fn collect(&self, mut keep: impl FnMut(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for ledger in self.ledgers() {
            let guard = ledger.read().await;
            out.extend(guard.bookings.iter().filter(|b| keep(b)).cloned());
        }
        out.sort_by_key(Booking::sort_key);
        out
    }
}
