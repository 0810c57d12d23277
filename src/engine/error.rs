use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::directory::DirectoryError;
use crate::model::{BookingStatus, DayOfWeek, SlotError, TimeSlot};

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Coach,
    Member,
    Transaction,
    Booking,
    Window,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Coach => "coach",
            Entity::Member => "member",
            Entity::Transaction => "transaction",
            Entity::Booking => "booking",
            Entity::Window => "availability window",
        })
    }
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidSlot(#[from] SlotError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Ulid },
    #[error("coach {coach_id} is not available on {day} {slot}")]
    Unavailable {
        coach_id: Ulid,
        day: DayOfWeek,
        slot: TimeSlot,
    },
    #[error("{slot} on {date} conflicts with booking {existing}")]
    Conflict {
        date: NaiveDate,
        slot: TimeSlot,
        existing: Ulid,
    },
    #[error("coach {coach_id} already has availability on {day} (window {existing})")]
    DuplicateWindow {
        coach_id: Ulid,
        day: DayOfWeek,
        existing: Ulid,
    },
    #[error("cannot change booking status from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    Journal(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl SchedulingError {
    pub fn not_found(entity: Entity, id: Ulid) -> Self {
        SchedulingError::NotFound { entity, id }
    }

    /// Stable tag naming the rule that rejected the request.
    pub fn rule(&self) -> &'static str {
        match self {
            SchedulingError::Validation(_)
            | SchedulingError::InvalidSlot(_)
            | SchedulingError::LimitExceeded(_) => "validation",
            SchedulingError::NotFound { .. } => "not_found",
            SchedulingError::Unavailable { .. } => "unavailable",
            SchedulingError::Conflict { .. } => "conflict",
            SchedulingError::DuplicateWindow { .. } => "duplicate_window",
            SchedulingError::InvalidTransition { .. } => "invalid_transition",
            SchedulingError::Journal(_) | SchedulingError::Directory(_) => "internal",
        }
    }

    pub fn is_internal(&self) -> bool {
        self.rule() == "internal"
    }
}
