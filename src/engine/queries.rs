use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, Entity, SchedulingError};

impl Engine {
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, SchedulingError> {
        self.bookings
            .get(booking_id)
            .await
            .ok_or_else(|| SchedulingError::not_found(Entity::Booking, booking_id))
    }

    /// A coach's bookings, optionally limited to one date, in chronological order.
    pub async fn bookings_by_coach(&self, coach_id: Ulid, date: Option<NaiveDate>) -> Vec<Booking> {
        let Some(ledger) = self.bookings.ledger(&coach_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        match date {
            Some(date) => guard.on_date(date).to_vec(),
            None => guard.bookings.clone(),
        }
    }

    pub async fn bookings_by_member(&self, member_id: Ulid) -> Vec<Booking> {
        self.bookings.collect(|b| b.member_id == member_id).await
    }

    pub async fn list_bookings(&self) -> Vec<Booking> {
        self.bookings.collect(|_| true).await
    }

    /// Advisory check; the authoritative check runs under the coach lock at commit.
    pub async fn has_conflict(
        &self,
        coach_id: Ulid,
        date: NaiveDate,
        slot: &TimeSlot,
        exclude: Option<Ulid>,
    ) -> bool {
        self.bookings.has_conflict(coach_id, date, slot, exclude).await
    }
}
