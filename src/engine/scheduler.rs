use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::directory::Role;
use crate::limits::{MAX_BOOKINGS_PER_COACH, MAX_COACHES};
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, check_transition, normalize_notes, parse_booking_date};
use super::{Engine, SchedulingError};

/// A booking request as it arrives. Every field is optional here so that a
/// missing one is reported as a validation failure rather than a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingDraft {
    pub transaction_id: Option<Ulid>,
    pub coach_id: Option<Ulid>,
    pub member_id: Option<Ulid>,
    pub booking_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub notes: Option<String>,
}

/// Fields a reschedule may change. Coach and member are fixed at creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingPatch {
    pub booking_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: Option<BookingStatus>,
    pub notes: Option<String>,
}

struct ValidRequest {
    transaction_id: Ulid,
    coach_id: Ulid,
    member_id: Ulid,
    date: NaiveDate,
    slot: TimeSlot,
    notes: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, SchedulingError> {
    value.ok_or_else(|| SchedulingError::Validation(format!("{field} is required")))
}

fn validate_shape(draft: BookingDraft) -> Result<ValidRequest, SchedulingError> {
    let transaction_id = required(draft.transaction_id, "transaction_id")?;
    let coach_id = required(draft.coach_id, "coach_id")?;
    let member_id = required(draft.member_id, "member_id")?;
    let date = parse_booking_date(&required(draft.booking_date, "booking_date")?)?;
    let start = required(draft.start_time, "start_time")?;
    let end = required(draft.end_time, "end_time")?;
    let slot = TimeSlot::from_wire(&start, &end)?;
    let notes = normalize_notes(draft.notes)?;
    Ok(ValidRequest {
        transaction_id,
        coach_id,
        member_id,
        date,
        slot,
        notes,
    })
}

impl Engine {
    /// Admit or reject a booking request. Stages run in order and the first
    /// failure is returned; only the final stage writes.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, SchedulingError> {
        let result = self.admit(draft).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                info!(
                    "booking {} created: coach {} {} {}",
                    booking.id, booking.coach_id, booking.booking_date, booking.slot
                );
            }
            Err(e) => {
                metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL, "rule" => e.rule()).increment(1);
                if e.is_internal() {
                    warn!("booking request failed: {e}");
                } else {
                    debug!("booking request rejected ({}): {e}", e.rule());
                }
            }
        }
        result
    }

    async fn admit(&self, draft: BookingDraft) -> Result<Booking, SchedulingError> {
        let req = validate_shape(draft)?;
        let day = DayOfWeek::of(req.date);

        self.require_user(req.coach_id, Role::Coach).await?;
        self.require_user(req.member_id, Role::Member).await?;
        let (_transaction, _claim) = self.linkage.check_eligible(req.transaction_id).await?;

        if !self.availability.is_available(req.coach_id, day, &req.slot).await {
            return Err(SchedulingError::Unavailable {
                coach_id: req.coach_id,
                day,
                slot: req.slot,
            });
        }

        let _gate = self.commit_gate.read().await;
        if self.bookings.ledger(&req.coach_id).is_none() && self.bookings.coach_count() >= MAX_COACHES {
            return Err(SchedulingError::LimitExceeded("too many coaches"));
        }
        let ledger = self.bookings.ledger_entry(req.coach_id);
        metrics::gauge!(observability::COACHES_TRACKED).set(self.bookings.coach_count() as f64);
        let mut guard = ledger.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_COACH {
            return Err(SchedulingError::LimitExceeded("too many bookings for coach"));
        }
        check_no_conflict(&guard, req.date, &req.slot, None)?;

        let booking = Booking {
            id: Ulid::new(),
            transaction_id: req.transaction_id,
            coach_id: req.coach_id,
            member_id: req.member_id,
            booking_date: req.date,
            slot: req.slot,
            status: BookingStatus::Scheduled,
            notes: req.notes,
        };
        let created = Event::BookingCreated { booking: booking.clone() };
        self.journal_booking_event(&mut guard, &created).await?;

        // Announced only after attach succeeds; a rolled-back booking is never published.
        if let Err(e) = self.linkage.attach(booking.transaction_id, booking.id).await {
            let undo = Event::BookingDeleted {
                id: booking.id,
                coach_id: booking.coach_id,
            };
            let mut rolled_back = self.journal_booking_event(&mut guard, &undo).await;
            if rolled_back.is_err() {
                rolled_back = self.journal_booking_event(&mut guard, &undo).await;
            }
            if let Err(undo_err) = rolled_back {
                error!(
                    "failed to roll back booking {} after attach error, it stays committed: {undo_err}",
                    booking.id
                );
            }
            return Err(e);
        }
        self.notify.send(&created);
        Ok(booking)
    }

    /// Reschedule, re-note or re-status a booking in one journal record.
    /// A schedule change is conflict-checked against the coach's other
    /// bookings; availability is not re-checked.
    pub async fn update_booking(&self, booking_id: Ulid, patch: BookingPatch) -> Result<Booking, SchedulingError> {
        let date = patch.booking_date.as_deref().map(parse_booking_date).transpose()?;
        let start = patch.start_time.as_deref().map(parse_wire_hour).transpose()?;
        let end = patch.end_time.as_deref().map(parse_wire_hour).transpose()?;
        let notes = patch.notes.map(|n| normalize_notes(Some(n))).transpose()?;

        let _gate = self.commit_gate.read().await;
        let (current, mut guard) = self.bookings.resolve_write(booking_id).await?;

        let mut next = current.clone();
        next.booking_date = date.unwrap_or(current.booking_date);
        next.slot = TimeSlot::new(
            start.unwrap_or(current.slot.start_hour()),
            end.unwrap_or(current.slot.end_hour()),
        )?;
        if let Some(status) = patch.status {
            check_transition(current.status, status)?;
            next.status = status;
        }
        if let Some(notes) = notes {
            next.notes = notes;
        }

        let rescheduled = next.booking_date != current.booking_date || next.slot != current.slot;
        if rescheduled && next.status.occupies_slot() {
            check_no_conflict(&guard, next.booking_date, &next.slot, Some(booking_id))?;
        }
        if next == current {
            return Ok(current);
        }

        self.commit_booking_event(&mut guard, Event::BookingUpdated { booking: next.clone() })
            .await?;
        if rescheduled {
            info!(
                "booking {booking_id} moved to {} ({}) {}",
                next.booking_date,
                next.day_of_week(),
                next.slot
            );
        }
        Ok(next)
    }
}
