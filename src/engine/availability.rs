use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::directory::{Role, User};
use crate::limits::MAX_COACHES;
use crate::model::*;

use super::{Engine, Entity, SchedulingError};

pub type SharedWeek = Arc<RwLock<CoachWeek>>;

/// Recurring weekly availability, one `CoachWeek` per coach.
#[derive(Default)]
pub struct AvailabilityStore {
    weeks: DashMap<Ulid, SharedWeek>,
    /// Reverse lookup: window id → coach id.
    window_to_coach: DashMap<Ulid, Ulid>,
}

impl AvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coach_count(&self) -> usize {
        self.weeks.len()
    }

    pub fn week(&self, coach_id: &Ulid) -> Option<SharedWeek> {
        self.weeks.get(coach_id).map(|e| e.value().clone())
    }

    pub fn week_entry(&self, coach_id: Ulid) -> SharedWeek {
        self.weeks
            .entry(coach_id)
            .or_insert_with(|| Arc::new(RwLock::new(CoachWeek::new(coach_id))))
            .clone()
    }

    pub fn weeks(&self) -> Vec<SharedWeek> {
        self.weeks.iter().map(|e| e.value().clone()).collect()
    }

    pub fn coach_for(&self, window_id: &Ulid) -> Option<Ulid> {
        self.window_to_coach.get(window_id).map(|e| *e.value())
    }

    /// Apply a window event (no locking; caller holds the week lock).
    pub fn apply(&self, week: &mut CoachWeek, event: &Event) {
        match event {
            Event::WindowCreated { window } => {
                week.put(window.clone());
                self.window_to_coach.insert(window.id, window.coach_id);
            }
            Event::WindowUpdated { window } => {
                // The weekday may have moved; clear the old day first.
                week.remove(window.id);
                week.put(window.clone());
            }
            Event::WindowDeleted { id, .. } => {
                week.remove(*id);
                self.window_to_coach.remove(id);
            }
            Event::BookingCreated { .. } | Event::BookingUpdated { .. } | Event::BookingDeleted { .. } => {}
        }
    }

    /// Whether the coach's window for `day` is open and overlaps `requested`.
    /// Overlap, not containment: a request straddling the window edge passes.
    pub async fn is_available(&self, coach_id: Ulid, day: DayOfWeek, requested: &TimeSlot) -> bool {
        let Some(week) = self.week(&coach_id) else {
            return false;
        };
        let guard = week.read().await;
        guard
            .on(day)
            .is_some_and(|w| w.is_available && w.slot.overlaps(requested))
    }

    /// Coaches with an open window on `day` passing the closed-bound
    /// `touches` test. Deliberately looser than `is_available`: a window that
    /// ends exactly when `requested` starts is listed here but would not
    /// admit the booking.
    pub async fn candidates(&self, day: DayOfWeek, requested: &TimeSlot) -> Vec<Ulid> {
        let mut coaches = Vec::new();
        for week in self.weeks() {
            let guard = week.read().await;
            if guard
                .on(day)
                .is_some_and(|w| w.is_available && w.slot.touches(requested))
            {
                coaches.push(guard.coach_id);
            }
        }
        coaches.sort();
        coaches
    }

    pub async fn window(&self, window_id: Ulid) -> Option<AvailabilityWindow> {
        let week = self.week(&self.coach_for(&window_id)?)?;
        let guard = week.read().await;
        guard.find(window_id).cloned()
    }

    pub async fn windows_for(&self, coach_id: Ulid) -> Vec<AvailabilityWindow> {
        let Some(week) = self.week(&coach_id) else {
            return Vec::new();
        };
        let guard = week.read().await;
        guard.windows().cloned().collect()
    }

    /// Every window, ordered by coach then weekday.
    pub async fn all_windows(&self) -> Vec<AvailabilityWindow> {
        let mut out = Vec::new();
        for week in self.weeks() {
            let guard = week.read().await;
            out.extend(guard.windows().cloned());
        }
        out.sort_by_key(|w| (w.coach_id, w.day_of_week));
        out
    }
}

/// Partial update of an availability window.
#[derive(Debug, Clone, Default)]
pub struct WindowPatch {
    pub day_of_week: Option<DayOfWeek>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_available: Option<bool>,
}

impl Engine {
    pub async fn set_availability(
        &self,
        coach_id: Ulid,
        day: DayOfWeek,
        slot: TimeSlot,
        is_available: bool,
    ) -> Result<AvailabilityWindow, SchedulingError> {
        self.require_user(coach_id, Role::Coach).await?;

        let _gate = self.commit_gate.read().await;
        if self.availability.week(&coach_id).is_none() && self.availability.coach_count() >= MAX_COACHES {
            return Err(SchedulingError::LimitExceeded("too many coaches"));
        }
        let week = self.availability.week_entry(coach_id);
        let mut guard = week.write().await;
        if let Some(existing) = guard.on(day) {
            return Err(SchedulingError::DuplicateWindow {
                coach_id,
                day,
                existing: existing.id,
            });
        }

        let window = AvailabilityWindow {
            id: Ulid::new(),
            coach_id,
            day_of_week: day,
            slot,
            is_available,
        };
        self.commit_window_event(&mut guard, Event::WindowCreated { window: window.clone() })
            .await?;
        info!("availability set: coach {coach_id} {day} {slot}");
        Ok(window)
    }

    pub async fn update_availability(
        &self,
        window_id: Ulid,
        patch: WindowPatch,
    ) -> Result<AvailabilityWindow, SchedulingError> {
        let start = patch.start_time.as_deref().map(parse_wire_hour).transpose()?;
        let end = patch.end_time.as_deref().map(parse_wire_hour).transpose()?;

        let _gate = self.commit_gate.read().await;
        let missing = || SchedulingError::not_found(Entity::Window, window_id);
        let coach_id = self.availability.coach_for(&window_id).ok_or_else(missing)?;
        let week = self.availability.week(&coach_id).ok_or_else(missing)?;
        let mut guard = week.write().await;
        let current = guard.find(window_id).cloned().ok_or_else(missing)?;

        let mut next = current.clone();
        next.slot = TimeSlot::new(
            start.unwrap_or(current.slot.start_hour()),
            end.unwrap_or(current.slot.end_hour()),
        )?;
        if let Some(day) = patch.day_of_week {
            if let Some(other) = guard.on(day).filter(|w| w.id != window_id) {
                return Err(SchedulingError::DuplicateWindow {
                    coach_id,
                    day,
                    existing: other.id,
                });
            }
            next.day_of_week = day;
        }
        if let Some(open) = patch.is_available {
            next.is_available = open;
        }
        if next == current {
            return Ok(current);
        }

        self.commit_window_event(&mut guard, Event::WindowUpdated { window: next.clone() })
            .await?;
        Ok(next)
    }

    pub async fn delete_availability(&self, window_id: Ulid) -> Result<AvailabilityWindow, SchedulingError> {
        let _gate = self.commit_gate.read().await;
        let missing = || SchedulingError::not_found(Entity::Window, window_id);
        let coach_id = self.availability.coach_for(&window_id).ok_or_else(missing)?;
        let week = self.availability.week(&coach_id).ok_or_else(missing)?;
        let mut guard = week.write().await;
        let window = guard.find(window_id).cloned().ok_or_else(missing)?;
        self.commit_window_event(&mut guard, Event::WindowDeleted { id: window_id, coach_id })
            .await?;
        Ok(window)
    }

    pub async fn get_window(&self, window_id: Ulid) -> Result<AvailabilityWindow, SchedulingError> {
        self.availability
            .window(window_id)
            .await
            .ok_or_else(|| SchedulingError::not_found(Entity::Window, window_id))
    }

    pub async fn windows_for_coach(&self, coach_id: Ulid) -> Vec<AvailabilityWindow> {
        self.availability.windows_for(coach_id).await
    }

    pub async fn list_windows(&self) -> Vec<AvailabilityWindow> {
        self.availability.all_windows().await
    }

    pub async fn is_available(&self, coach_id: Ulid, day: DayOfWeek, requested: &TimeSlot) -> bool {
        self.availability.is_available(coach_id, day, requested).await
    }

    /// Active coaches whose window on `day` passes the closed-bound test.
    pub async fn available_coaches_for(
        &self,
        day: DayOfWeek,
        requested: &TimeSlot,
    ) -> Result<Vec<User>, SchedulingError> {
        let mut coaches = Vec::new();
        for coach_id in self.availability.candidates(day, requested).await {
            if let Some(user) = self.users.find_active_user(coach_id, Role::Coach).await? {
                coaches.push(user);
            }
        }
        Ok(coaches)
    }
}
