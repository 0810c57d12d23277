use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::check_transition;
use super::{Engine, SchedulingError};

impl Engine {
    /// Move a booking along the status table. `scheduled → scheduled` is
    /// accepted and changes nothing; terminal states reject everything.
    pub async fn update_status(&self, booking_id: Ulid, status: BookingStatus) -> Result<Booking, SchedulingError> {
        let _gate = self.commit_gate.read().await;
        let (current, mut guard) = self.bookings.resolve_write(booking_id).await?;
        check_transition(current.status, status)?;
        if current.status == status {
            return Ok(current);
        }

        let updated = Booking { status, ..current };
        self.commit_booking_event(&mut guard, Event::BookingUpdated { booking: updated.clone() })
            .await?;
        info!("booking {booking_id} is now {status}");
        Ok(updated)
    }

    /// Hard delete. The transaction keeps its booking id.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<Booking, SchedulingError> {
        let _gate = self.commit_gate.read().await;
        let (booking, mut guard) = self.bookings.resolve_write(booking_id).await?;
        let event = Event::BookingDeleted {
            id: booking_id,
            coach_id: booking.coach_id,
        };
        self.commit_booking_event(&mut guard, event).await?;
        info!("booking {booking_id} deleted");
        Ok(booking)
    }
}
