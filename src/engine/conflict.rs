use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_NOTES_LEN;
use crate::model::*;

use super::SchedulingError;

/// First booking occupying an overlapping slot on `date`, skipping `exclude`.
/// Cancelled and no-show bookings never conflict.
pub(crate) fn find_conflict<'a>(
    ledger: &'a CoachLedger,
    date: NaiveDate,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    ledger
        .overlapping(date, slot)
        .filter(|b| Some(b.id) != exclude)
        .find(|b| b.status.occupies_slot())
}

pub(crate) fn check_no_conflict(
    ledger: &CoachLedger,
    date: NaiveDate,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Result<(), SchedulingError> {
    match find_conflict(ledger, date, slot, exclude) {
        Some(existing) => Err(SchedulingError::Conflict {
            date,
            slot: *slot,
            existing: existing.id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), SchedulingError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(SchedulingError::InvalidTransition { from, to })
    }
}

pub(crate) fn parse_booking_date(raw: &str) -> Result<NaiveDate, SchedulingError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        SchedulingError::Validation(format!("booking_date {raw:?} is not a YYYY-MM-DD date"))
    })
}

/// Blank notes are stored as none.
pub(crate) fn normalize_notes(notes: Option<String>) -> Result<Option<String>, SchedulingError> {
    let Some(notes) = notes else { return Ok(None) };
    let trimmed = notes.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_NOTES_LEN {
        return Err(SchedulingError::LimitExceeded("notes too long"));
    }
    Ok(Some(trimmed.to_string()))
}
