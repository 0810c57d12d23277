use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Whole hour of the day, the only time-of-day type.
pub type Hour = u8;

/// First bookable hour.
pub const OPENING_HOUR: Hour = 8;
/// Last bookable hour (exclusive end of the day).
pub const CLOSING_HOUR: Hour = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("invalid slot: {0:02}:00 is outside 08:00-20:00")]
    OutOfHours(Hour),
    #[error("invalid slot: end {end:02}:00 must be after start {start:02}:00")]
    EndNotAfterStart { start: Hour, end: Hour },
    #[error("invalid slot: {0:?} is not an on-the-hour HH:00 time")]
    Malformed(String),
}

/// Half-open hour interval `[start_hour, end_hour)` within opening hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    start_hour: Hour,
    end_hour: Hour,
}

impl TimeSlot {
    pub fn new(start_hour: Hour, end_hour: Hour) -> Result<Self, SlotError> {
        for hour in [start_hour, end_hour] {
            if !(OPENING_HOUR..=CLOSING_HOUR).contains(&hour) {
                return Err(SlotError::OutOfHours(hour));
            }
        }
        if start_hour >= end_hour {
            return Err(SlotError::EndNotAfterStart {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self { start_hour, end_hour })
    }

    /// Parse a pair of `"HH:00"` (or `"HH:00:00"`) strings.
    pub fn from_wire(start: &str, end: &str) -> Result<Self, SlotError> {
        Self::new(parse_wire_hour(start)?, parse_wire_hour(end)?)
    }

    pub fn start_hour(&self) -> Hour {
        self.start_hour
    }

    pub fn end_hour(&self) -> Hour {
        self.end_hour
    }

    pub fn duration_hours(&self) -> Hour {
        self.end_hour - self.start_hour
    }

    /// Half-open overlap: slots that only touch do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start_hour < other.end_hour && other.start_hour < self.end_hour
    }

    /// Closed-bound test used by coach search. Unlike `overlaps`, a window
    /// ending exactly where `other` starts (or the reverse) matches.
    pub fn touches(&self, other: &TimeSlot) -> bool {
        self.start_hour <= other.end_hour && self.end_hour >= other.start_hour
    }

    pub fn start_wire(&self) -> String {
        format_wire_hour(self.start_hour)
    }

    pub fn end_wire(&self) -> String {
        format_wire_hour(self.end_hour)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.start_hour, self.end_hour)
    }
}

pub fn format_wire_hour(hour: Hour) -> String {
    format!("{hour:02}:00")
}

/// Accepts `HH:00` and `HH:00:00`; anything off the hour is rejected.
pub fn parse_wire_hour(raw: &str) -> Result<Hour, SlotError> {
    let malformed = || SlotError::Malformed(raw.to_string());
    let mut parts = raw.trim().split(':');
    let hour = parts.next().ok_or_else(malformed)?;
    let minutes = parts.next().ok_or_else(malformed)?;
    let seconds = parts.next();
    if parts.next().is_some() {
        return Err(malformed());
    }
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hour) || minutes != "00" || seconds.is_some_and(|s| s != "00") {
        return Err(malformed());
    }
    hour.parse::<Hour>().map_err(|_| malformed())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid day of week: {0:?}")]
pub struct ParseDayError(pub String);

/// Day of week, indexed Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Weekday of a calendar date. Locale independent.
    pub fn of(date: NaiveDate) -> Self {
        Self::ALL[date.weekday().num_days_from_sunday() as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DayOfWeek {
    type Err = ParseDayError;

    /// Accepts `0`..`6`, full names and three-letter abbreviations.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Self::from_index(index).ok_or_else(|| ParseDayError(s.to_string()));
        }
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|day| day.name() == lower || (lower.len() == 3 && day.name().starts_with(&lower)))
            .ok_or_else(|| ParseDayError(s.to_string()))
    }
}

/// Booking lifecycle. `Scheduled` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Scheduled)
    }

    /// Transition table: scheduled → anything (scheduled → scheduled is a
    /// no-op); terminal states accept nothing.
    pub fn can_transition_to(self, _next: BookingStatus) -> bool {
        match self {
            BookingStatus::Scheduled => true,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow => false,
        }
    }

    /// Cancelled and no-show bookings free their slot.
    pub fn occupies_slot(self) -> bool {
        matches!(self, BookingStatus::Scheduled | BookingStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coach's recurring weekly working hours for one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub day_of_week: DayOfWeek,
    pub slot: TimeSlot,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub transaction_id: Ulid,
    pub coach_id: Ulid,
    pub member_id: Ulid,
    pub booking_date: NaiveDate,
    pub slot: TimeSlot,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

impl Booking {
    /// Chronological order: date, then start hour, then id for stability.
    pub fn sort_key(&self) -> (NaiveDate, Hour, Ulid) {
        (self.booking_date, self.slot.start_hour(), self.id)
    }

    pub fn day_of_week(&self) -> DayOfWeek {
        DayOfWeek::of(self.booking_date)
    }
}

/// All bookings of one coach, sorted by `sort_key`.
#[derive(Debug, Clone)]
pub struct CoachLedger {
    pub coach_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl CoachLedger {
    pub fn new(coach_id: Ulid) -> Self {
        Self {
            coach_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining chronological order.
    pub fn insert(&mut self, booking: Booking) {
        let key = booking.sort_key();
        let pos = self
            .bookings
            .binary_search_by_key(&key, Booking::sort_key)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings on `date`, located by binary search on the sorted list.
    pub fn on_date(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.booking_date < date);
        let hi = self.bookings.partition_point(|b| b.booking_date <= date);
        &self.bookings[lo..hi]
    }

    /// Bookings on `date` whose slot overlaps `slot`, whatever their status.
    pub fn overlapping(&self, date: NaiveDate, slot: &TimeSlot) -> impl Iterator<Item = &Booking> {
        self.on_date(date)
            .iter()
            .filter(move |b| b.slot.overlaps(slot))
    }
}

/// One coach's availability, at most one window per weekday.
#[derive(Debug, Clone)]
pub struct CoachWeek {
    pub coach_id: Ulid,
    pub days: [Option<AvailabilityWindow>; 7],
}

impl CoachWeek {
    pub fn new(coach_id: Ulid) -> Self {
        Self {
            coach_id,
            days: Default::default(),
        }
    }

    pub fn on(&self, day: DayOfWeek) -> Option<&AvailabilityWindow> {
        self.days[day.index()].as_ref()
    }

    pub fn find(&self, id: Ulid) -> Option<&AvailabilityWindow> {
        self.windows().find(|w| w.id == id)
    }

    /// Place `window` on its weekday, replacing whatever was there.
    pub fn put(&mut self, window: AvailabilityWindow) {
        let day = window.day_of_week;
        self.days[day.index()] = Some(window);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<AvailabilityWindow> {
        self.days
            .iter_mut()
            .find(|d| d.as_ref().is_some_and(|w| w.id == id))
            .and_then(Option::take)
    }

    /// Windows ordered Sunday → Saturday.
    pub fn windows(&self) -> impl Iterator<Item = &AvailabilityWindow> {
        self.days.iter().flatten()
    }
}

/// Journal record format: one event per committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowCreated { window: AvailabilityWindow },
    WindowUpdated { window: AvailabilityWindow },
    WindowDeleted { id: Ulid, coach_id: Ulid },
    BookingCreated { booking: Booking },
    BookingUpdated { booking: Booking },
    BookingDeleted { id: Ulid, coach_id: Ulid },
}

impl Event {
    pub fn coach_id(&self) -> Ulid {
        match self {
            Event::WindowCreated { window } | Event::WindowUpdated { window } => window.coach_id,
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => booking.coach_id,
            Event::WindowDeleted { coach_id, .. } | Event::BookingDeleted { coach_id, .. } => *coach_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::WindowCreated { .. } => "window_created",
            Event::WindowUpdated { .. } => "window_updated",
            Event::WindowDeleted { .. } => "window_deleted",
            Event::BookingCreated { .. } => "booking_created",
            Event::BookingUpdated { .. } => "booking_updated",
            Event::BookingDeleted { .. } => "booking_deleted",
        }
    }
}
