use super::*;
use crate::directory::{DirectoryError, InMemoryDirectory, Transaction, UserStatus};

use async_trait::async_trait;
use chrono::NaiveDate;

// 2024-01-01 is a Monday.
const MONDAY: &str = "2024-01-01";
const TUESDAY: &str = "2024-01-02";
const NEXT_MONDAY: &str = "2024-01-08";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("coachbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn slot(start: Hour, end: Hour) -> TimeSlot {
    TimeSlot::new(start, end).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn user(role: Role, status: UserStatus) -> User {
    User {
        id: Ulid::new(),
        name: format!("{role:?} user"),
        phone_number: None,
        role,
        status,
    }
}

async fn open_engine(
    path: PathBuf,
    users: Arc<dyn UserDirectory>,
    transactions: Arc<dyn TransactionStore>,
    policy: LinkagePolicy,
) -> Engine {
    let collaborators = Collaborators { users, transactions };
    Engine::open(path, collaborators, policy, Arc::new(NotifyHub::new()))
        .await
        .unwrap()
}

struct Fixture {
    engine: Engine,
    directory: Arc<InMemoryDirectory>,
    path: PathBuf,
    coach: Ulid,
    member: Ulid,
}

impl Fixture {
    async fn new(name: &str) -> Self {
        Self::with_policy(name, LinkagePolicy::Overwrite).await
    }

    async fn with_policy(name: &str, policy: LinkagePolicy) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let coach = user(Role::Coach, UserStatus::Active);
        let member = user(Role::Member, UserStatus::Active);
        let (coach_id, member_id) = (coach.id, member.id);
        directory.upsert_user(coach);
        directory.upsert_user(member);
        let path = test_wal_path(name);
        let engine = open_engine(path.clone(), directory.clone(), directory.clone(), policy).await;
        Self {
            engine,
            directory,
            path,
            coach: coach_id,
            member: member_id,
        }
    }

    async fn reopen(&self) -> Engine {
        open_engine(
            self.path.clone(),
            self.directory.clone(),
            self.directory.clone(),
            LinkagePolicy::Overwrite,
        )
        .await
    }

    fn add_user(&self, role: Role, status: UserStatus) -> Ulid {
        let u = user(role, status);
        let id = u.id;
        self.directory.upsert_user(u);
        id
    }

    fn transaction(&self) -> Ulid {
        let id = Ulid::new();
        self.directory.upsert_transaction(Transaction {
            id,
            member_id: self.member,
            booking_id: None,
        });
        id
    }

    fn draft(&self, day: &str, start: &str, end: &str) -> BookingDraft {
        BookingDraft {
            transaction_id: Some(self.transaction()),
            coach_id: Some(self.coach),
            member_id: Some(self.member),
            booking_date: Some(day.into()),
            start_time: Some(start.into()),
            end_time: Some(end.into()),
            notes: None,
        }
    }

    /// Monday 08:00-12:00.
    async fn monday_window(&self) -> AvailabilityWindow {
        self.engine
            .set_availability(self.coach, DayOfWeek::Monday, slot(8, 12), true)
            .await
            .unwrap()
    }

    async fn book(&self, day: &str, start: &str, end: &str) -> Result<Booking, SchedulingError> {
        self.engine.create_booking(self.draft(day, start, end)).await
    }
}

// ── Booking scenarios ────────────────────────────────────

#[tokio::test]
async fn accepts_booking_inside_window() {
    let fx = Fixture::new("accept.wal").await;
    fx.monday_window().await;

    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    assert_eq!(booking.status, BookingStatus::Scheduled);
    assert_eq!(booking.slot, slot(9, 10));
    assert_eq!(booking.day_of_week(), DayOfWeek::Monday);
    assert_eq!(fx.engine.get_booking(booking.id).await.unwrap(), booking);
    assert_eq!(
        fx.directory.transaction(&booking.transaction_id).unwrap().booking_id,
        Some(booking.id)
    );
}

#[tokio::test]
async fn same_slot_for_another_member_conflicts() {
    let fx = Fixture::new("conflict.wal").await;
    fx.monday_window().await;
    let first = fx.book(MONDAY, "09:00", "10:00").await.unwrap();

    let off_hour = fx.book(MONDAY, "09:30", "10:00").await.unwrap_err();
    assert_eq!(off_hour.rule(), "validation");

    let other = fx.add_user(Role::Member, UserStatus::Active);
    let draft = BookingDraft { member_id: Some(other), ..fx.draft(MONDAY, "09:00", "10:00") };
    let err = fx.engine.create_booking(draft).await.unwrap_err();
    match err {
        SchedulingError::Conflict { existing, .. } => assert_eq!(existing, first.id),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn adjacent_bookings_do_not_conflict() {
    let fx = Fixture::new("adjacent.wal").await;
    fx.monday_window().await;
    fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    fx.book(MONDAY, "10:00", "11:00").await.unwrap();
    fx.book(MONDAY, "08:00", "09:00").await.unwrap();
    // Same slot a week later is a different date.
    fx.book(NEXT_MONDAY, "09:00", "10:00").await.unwrap();
}

#[tokio::test]
async fn day_without_window_is_unavailable() {
    let fx = Fixture::new("unavailable.wal").await;
    fx.monday_window().await;
    let err = fx.book(TUESDAY, "09:00", "10:00").await.unwrap_err();
    assert!(matches!(err, SchedulingError::Unavailable { day: DayOfWeek::Tuesday, .. }));
    assert_eq!(err.rule(), "unavailable");
}

#[tokio::test]
async fn end_before_start_is_validation() {
    let fx = Fixture::new("backwards.wal").await;
    fx.monday_window().await;
    let err = fx.book(MONDAY, "14:00", "13:00").await.unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidSlot(SlotError::EndNotAfterStart { .. })));
    assert_eq!(err.rule(), "validation");
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let fx = Fixture::new("cancel.wal").await;
    fx.monday_window().await;
    let first = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    fx.engine.update_status(first.id, BookingStatus::Cancelled).await.unwrap();

    let again = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    assert_ne!(again.id, first.id);
}

#[tokio::test]
async fn no_show_frees_but_completed_holds() {
    let fx = Fixture::new("no_show.wal").await;
    fx.monday_window().await;
    let a = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let b = fx.book(MONDAY, "10:00", "11:00").await.unwrap();
    fx.engine.update_status(a.id, BookingStatus::NoShow).await.unwrap();
    fx.engine.update_status(b.id, BookingStatus::Completed).await.unwrap();

    fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let err = fx.book(MONDAY, "10:00", "11:00").await.unwrap_err();
    assert_eq!(err.rule(), "conflict");
}

#[tokio::test]
async fn terminal_status_never_changes() {
    let fx = Fixture::new("terminal.wal").await;
    fx.monday_window().await;
    let terminals = [BookingStatus::Completed, BookingStatus::Cancelled, BookingStatus::NoShow];
    for (i, terminal) in terminals.into_iter().enumerate() {
        let start = format!("{:02}:00", 8 + i);
        let end = format!("{:02}:00", 9 + i);
        let booking = fx.book(MONDAY, &start, &end).await.unwrap();
        fx.engine.update_status(booking.id, terminal).await.unwrap();

        for next in [BookingStatus::Scheduled, BookingStatus::Completed, BookingStatus::Cancelled, BookingStatus::NoShow] {
            let err = fx.engine.update_status(booking.id, next).await.unwrap_err();
            assert!(matches!(err, SchedulingError::InvalidTransition { .. }), "{terminal} -> {next}");
        }
        assert_eq!(fx.engine.get_booking(booking.id).await.unwrap().status, terminal);
    }
}

#[tokio::test]
async fn completed_to_scheduled_is_rejected() {
    let fx = Fixture::new("completed.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    fx.engine.update_status(booking.id, BookingStatus::Completed).await.unwrap();
    let err = fx.engine.update_status(booking.id, BookingStatus::Scheduled).await.unwrap_err();
    assert_eq!(err.to_string(), "cannot change booking status from completed to scheduled");
}

#[tokio::test]
async fn scheduled_to_scheduled_is_a_no_op() {
    let fx = Fixture::new("noop_status.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let before = fx.engine.wal_appends_since_compact().await;
    let same = fx.engine.update_status(booking.id, BookingStatus::Scheduled).await.unwrap();
    assert_eq!(same, booking);
    assert_eq!(fx.engine.wal_appends_since_compact().await, before);
}

#[tokio::test]
async fn request_straddling_window_edge_is_accepted() {
    let fx = Fixture::new("straddle.wal").await;
    fx.monday_window().await;
    // Window ends at 12; overlap, not containment, is what counts.
    fx.book(MONDAY, "11:00", "13:00").await.unwrap();
    let err = fx.book(MONDAY, "12:00", "13:00").await.unwrap_err();
    assert_eq!(err.rule(), "unavailable");
}

#[tokio::test]
async fn closed_window_rejects_bookings() {
    let fx = Fixture::new("closed.wal").await;
    fx.engine
        .set_availability(fx.coach, DayOfWeek::Monday, slot(8, 12), false)
        .await
        .unwrap();
    let err = fx.book(MONDAY, "09:00", "10:00").await.unwrap_err();
    assert_eq!(err.rule(), "unavailable");
}

#[tokio::test]
async fn pipeline_reports_first_failing_stage() {
    let fx = Fixture::new("pipeline.wal").await;
    fx.monday_window().await;

    // Bad shape wins over unknown coach.
    let draft = BookingDraft {
        coach_id: Some(Ulid::new()),
        start_time: Some("7:00".into()),
        ..fx.draft(MONDAY, "09:00", "10:00")
    };
    assert_eq!(fx.engine.create_booking(draft).await.unwrap_err().rule(), "validation");

    // Unknown coach wins over unknown member.
    let draft = BookingDraft {
        coach_id: Some(Ulid::new()),
        member_id: Some(Ulid::new()),
        ..fx.draft(MONDAY, "09:00", "10:00")
    };
    let err = fx.engine.create_booking(draft).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: Entity::Coach, .. }));

    // A member id in the coach slot is not a coach.
    let draft = BookingDraft { coach_id: Some(fx.member), ..fx.draft(MONDAY, "09:00", "10:00") };
    let err = fx.engine.create_booking(draft).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: Entity::Coach, .. }));

    let inactive = fx.add_user(Role::Member, UserStatus::Inactive);
    let draft = BookingDraft { member_id: Some(inactive), ..fx.draft(TUESDAY, "09:00", "10:00") };
    let err = fx.engine.create_booking(draft).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: Entity::Member, .. }));

    // Unknown transaction wins over unavailability.
    let draft = BookingDraft { transaction_id: Some(Ulid::new()), ..fx.draft(TUESDAY, "09:00", "10:00") };
    let err = fx.engine.create_booking(draft).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: Entity::Transaction, .. }));
}

#[tokio::test]
async fn rejected_requests_write_nothing() {
    let fx = Fixture::new("rejected.wal").await;
    fx.monday_window().await;
    fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let before = fx.engine.wal_appends_since_compact().await;

    fx.book(MONDAY, "09:00", "10:00").await.unwrap_err();
    fx.book(TUESDAY, "09:00", "10:00").await.unwrap_err();
    fx.book(MONDAY, "10:00", "09:00").await.unwrap_err();

    assert_eq!(fx.engine.wal_appends_since_compact().await, before);
    assert_eq!(fx.engine.list_bookings().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_admit_exactly_one() {
    let fx = Fixture::new("concurrent.wal").await;
    fx.monday_window().await;
    let drafts: Vec<_> = (0..16).map(|_| fx.draft(MONDAY, "09:00", "11:00")).collect();
    let engine = Arc::new(fx.engine);

    let mut handles = Vec::new();
    for draft in drafts {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.create_booking(draft).await }));
    }
    let mut admitted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(e) => assert_eq!(e.rule(), "conflict"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(engine.bookings_by_coach(fx.coach, None).await.len(), 1);
}

// ── Reschedule path ──────────────────────────────────────

#[tokio::test]
async fn reschedule_excludes_itself() {
    let fx = Fixture::new("reschedule_self.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();

    let patch = BookingPatch { end_time: Some("11:00".into()), ..Default::default() };
    let moved = fx.engine.update_booking(booking.id, patch).await.unwrap();
    assert_eq!(moved.slot, slot(9, 11));
    assert_eq!(moved.id, booking.id);
}

#[tokio::test]
async fn reschedule_onto_other_booking_conflicts() {
    let fx = Fixture::new("reschedule_conflict.wal").await;
    fx.monday_window().await;
    let a = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let b = fx.book(MONDAY, "10:00", "11:00").await.unwrap();

    let patch = BookingPatch {
        start_time: Some("10:00".into()),
        end_time: Some("11:00".into()),
        ..Default::default()
    };
    let err = fx.engine.update_booking(a.id, patch).await.unwrap_err();
    match err {
        SchedulingError::Conflict { existing, .. } => assert_eq!(existing, b.id),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(fx.engine.get_booking(a.id).await.unwrap().slot, slot(9, 10));
}

#[tokio::test]
async fn reschedule_does_not_recheck_availability() {
    let fx = Fixture::new("reschedule_avail.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let patch = BookingPatch { booking_date: Some(TUESDAY.into()), ..Default::default() };
    let moved = fx.engine.update_booking(booking.id, patch).await.unwrap();
    assert_eq!(moved.booking_date, date(TUESDAY));
    assert_eq!(moved.day_of_week(), DayOfWeek::Tuesday);
}

#[tokio::test]
async fn update_combines_status_notes_and_schedule() {
    let fx = Fixture::new("update_combined.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let before = fx.engine.wal_appends_since_compact().await;

    let patch = BookingPatch {
        start_time: Some("10:00".into()),
        end_time: Some("11:00:00".into()),
        status: Some(BookingStatus::Completed),
        notes: Some("  leg day  ".into()),
        ..Default::default()
    };
    let updated = fx.engine.update_booking(booking.id, patch).await.unwrap();
    assert_eq!(updated.slot, slot(10, 11));
    assert_eq!(updated.status, BookingStatus::Completed);
    assert_eq!(updated.notes.as_deref(), Some("leg day"));
    assert_eq!(fx.engine.wal_appends_since_compact().await, before + 1);

    let patch = BookingPatch { status: Some(BookingStatus::Scheduled), ..Default::default() };
    let err = fx.engine.update_booking(booking.id, patch).await.unwrap_err();
    assert_eq!(err.rule(), "invalid_transition");
}

#[tokio::test]
async fn update_rejects_bad_fields_and_missing_booking() {
    let fx = Fixture::new("update_invalid.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();

    let patch = BookingPatch { start_time: Some("11:00".into()), ..Default::default() };
    let err = fx.engine.update_booking(booking.id, patch).await.unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidSlot(SlotError::EndNotAfterStart { .. })));

    let patch = BookingPatch { booking_date: Some("2024-13-01".into()), ..Default::default() };
    assert_eq!(fx.engine.update_booking(booking.id, patch).await.unwrap_err().rule(), "validation");

    let err = fx.engine.update_booking(Ulid::new(), BookingPatch::default()).await.unwrap_err();
    assert!(matches!(err, SchedulingError::NotFound { entity: Entity::Booking, .. }));
}

// ── Queries and deletes ──────────────────────────────────

#[tokio::test]
async fn listings_are_chronological_and_repeatable() {
    let fx = Fixture::new("listings.wal").await;
    fx.monday_window().await;
    let late = fx.book(NEXT_MONDAY, "08:00", "09:00").await.unwrap();
    let noon = fx.book(MONDAY, "11:00", "12:00").await.unwrap();
    let early = fx.book(MONDAY, "08:00", "09:00").await.unwrap();

    let first = fx.engine.bookings_by_coach(fx.coach, None).await;
    let second = fx.engine.bookings_by_coach(fx.coach, None).await;
    assert_eq!(first, second);
    let ids: Vec<_> = first.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![early.id, noon.id, late.id]);

    let monday = fx.engine.bookings_by_coach(fx.coach, Some(date(MONDAY))).await;
    assert_eq!(monday.len(), 2);
    assert!(fx.engine.bookings_by_coach(Ulid::new(), None).await.is_empty());

    assert_eq!(fx.engine.bookings_by_member(fx.member).await, first);
    assert!(fx.engine.bookings_by_member(Ulid::new()).await.is_empty());
    assert_eq!(fx.engine.list_bookings().await, first);
}

#[tokio::test]
async fn delete_is_hard_and_keeps_transaction_link() {
    let fx = Fixture::new("delete.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();

    let deleted = fx.engine.delete_booking(booking.id).await.unwrap();
    assert_eq!(deleted, booking);
    assert!(matches!(
        fx.engine.get_booking(booking.id).await,
        Err(SchedulingError::NotFound { entity: Entity::Booking, .. })
    ));
    assert!(fx.engine.delete_booking(booking.id).await.is_err());
    assert_eq!(
        fx.directory.transaction(&booking.transaction_id).unwrap().booking_id,
        Some(booking.id)
    );
    fx.book(MONDAY, "09:00", "10:00").await.unwrap();
}

#[tokio::test]
async fn has_conflict_reports_overlaps() {
    let fx = Fixture::new("has_conflict.wal").await;
    fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let monday = date(MONDAY);
    assert!(fx.engine.has_conflict(fx.coach, monday, &slot(9, 12), None).await);
    assert!(!fx.engine.has_conflict(fx.coach, monday, &slot(9, 12), Some(booking.id)).await);
    assert!(!fx.engine.has_conflict(fx.coach, monday, &slot(10, 12), None).await);
}

// ── Availability windows ─────────────────────────────────

#[tokio::test]
async fn one_window_per_coach_and_day() {
    let fx = Fixture::new("duplicate_window.wal").await;
    let window = fx.monday_window().await;
    let err = fx
        .engine
        .set_availability(fx.coach, DayOfWeek::Monday, slot(14, 18), true)
        .await
        .unwrap_err();
    match err {
        SchedulingError::DuplicateWindow { existing, .. } => assert_eq!(existing, window.id),
        other => panic!("expected duplicate, got {other:?}"),
    }
    fx.engine
        .set_availability(fx.coach, DayOfWeek::Tuesday, slot(14, 18), true)
        .await
        .unwrap();
    assert_eq!(fx.engine.windows_for_coach(fx.coach).await.len(), 2);
}

#[tokio::test]
async fn windows_require_an_active_coach() {
    let fx = Fixture::new("window_coach.wal").await;
    let inactive = fx.add_user(Role::Coach, UserStatus::Inactive);
    for coach in [inactive, fx.member, Ulid::new()] {
        let err = fx
            .engine
            .set_availability(coach, DayOfWeek::Monday, slot(8, 12), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::NotFound { entity: Entity::Coach, .. }));
    }
}

#[tokio::test]
async fn is_available_without_window_is_false() {
    let fx = Fixture::new("no_window.wal").await;
    for day in DayOfWeek::ALL {
        assert!(!fx.engine.is_available(fx.coach, day, &slot(8, 20)).await);
    }
    fx.monday_window().await;
    assert!(fx.engine.is_available(fx.coach, DayOfWeek::Monday, &slot(9, 10)).await);
    assert!(!fx.engine.is_available(fx.coach, DayOfWeek::Sunday, &slot(9, 10)).await);
}

#[tokio::test]
async fn window_update_and_delete() {
    let fx = Fixture::new("window_update.wal").await;
    let window = fx.monday_window().await;
    let tuesday = fx
        .engine
        .set_availability(fx.coach, DayOfWeek::Tuesday, slot(8, 12), true)
        .await
        .unwrap();

    let patch = WindowPatch { day_of_week: Some(DayOfWeek::Tuesday), ..Default::default() };
    let err = fx.engine.update_availability(window.id, patch).await.unwrap_err();
    assert_eq!(err.rule(), "duplicate_window");

    let patch = WindowPatch {
        day_of_week: Some(DayOfWeek::Friday),
        start_time: Some("14:00".into()),
        end_time: Some("18:00".into()),
        ..Default::default()
    };
    let moved = fx.engine.update_availability(window.id, patch).await.unwrap();
    assert_eq!(moved.day_of_week, DayOfWeek::Friday);
    assert_eq!(moved.slot, slot(14, 18));
    assert!(!fx.engine.is_available(fx.coach, DayOfWeek::Monday, &slot(9, 10)).await);
    assert!(fx.engine.is_available(fx.coach, DayOfWeek::Friday, &slot(15, 16)).await);

    let patch = WindowPatch { end_time: Some("13:00".into()), ..Default::default() };
    let err = fx.engine.update_availability(window.id, patch).await.unwrap_err();
    assert_eq!(err.rule(), "validation");

    let patch = WindowPatch { is_available: Some(false), ..Default::default() };
    let closed = fx.engine.update_availability(tuesday.id, patch).await.unwrap();
    assert!(!closed.is_available);
    assert!(!fx.engine.is_available(fx.coach, DayOfWeek::Tuesday, &slot(9, 10)).await);

    fx.engine.delete_availability(window.id).await.unwrap();
    assert!(matches!(
        fx.engine.get_window(window.id).await,
        Err(SchedulingError::NotFound { entity: Entity::Window, .. })
    ));
    assert!(fx.engine.delete_availability(window.id).await.is_err());
    let err = fx.engine.update_availability(window.id, WindowPatch::default()).await.unwrap_err();
    assert_eq!(err.rule(), "not_found");
    assert_eq!(fx.engine.list_windows().await, vec![closed]);
}

#[tokio::test]
async fn coach_search_uses_closed_bounds() {
    let fx = Fixture::new("search.wal").await;
    fx.engine
        .set_availability(fx.coach, DayOfWeek::Monday, slot(8, 10), true)
        .await
        .unwrap();

    // A window ending at 10 touches a 10-11 request: listed, but not bookable.
    let requested = slot(10, 11);
    assert!(!fx.engine.is_available(fx.coach, DayOfWeek::Monday, &requested).await);
    let coaches = fx.engine.available_coaches_for(DayOfWeek::Monday, &requested).await.unwrap();
    assert_eq!(coaches.iter().map(|c| c.id).collect::<Vec<_>>(), vec![fx.coach]);
    assert_eq!(fx.book(MONDAY, "10:00", "11:00").await.unwrap_err().rule(), "unavailable");

    let beyond = fx.engine.available_coaches_for(DayOfWeek::Monday, &slot(11, 12)).await.unwrap();
    assert!(beyond.is_empty());
}

#[tokio::test]
async fn coach_search_skips_closed_and_inactive() {
    let fx = Fixture::new("search_filter.wal").await;
    let closed = fx.add_user(Role::Coach, UserStatus::Active);
    let leaving = fx.add_user(Role::Coach, UserStatus::Active);
    for (coach, open) in [(fx.coach, true), (closed, false), (leaving, true)] {
        fx.engine
            .set_availability(coach, DayOfWeek::Wednesday, slot(8, 20), open)
            .await
            .unwrap();
    }
    let mut gone = fx.directory.user(&leaving).unwrap();
    gone.status = UserStatus::Inactive;
    fx.directory.upsert_user(gone);

    let coaches = fx.engine.available_coaches_for(DayOfWeek::Wednesday, &slot(9, 10)).await.unwrap();
    assert_eq!(coaches.len(), 1);
    assert_eq!(coaches[0].id, fx.coach);
}

// ── Transaction linkage ──────────────────────────────────

#[tokio::test]
async fn overwrite_policy_relinks_transaction() {
    let fx = Fixture::new("overwrite.wal").await;
    fx.monday_window().await;
    let first = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let draft = BookingDraft {
        transaction_id: Some(first.transaction_id),
        ..fx.draft(MONDAY, "10:00", "11:00")
    };
    let second = fx.engine.create_booking(draft).await.unwrap();
    assert_eq!(
        fx.directory.transaction(&first.transaction_id).unwrap().booking_id,
        Some(second.id)
    );
}

#[tokio::test]
async fn strict_policy_rejects_linked_transaction() {
    let fx = Fixture::with_policy("strict.wal", LinkagePolicy::Strict).await;
    fx.monday_window().await;
    let first = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let draft = BookingDraft {
        transaction_id: Some(first.transaction_id),
        ..fx.draft(MONDAY, "10:00", "11:00")
    };
    let err = fx.engine.create_booking(draft).await.unwrap_err();
    assert_eq!(err.rule(), "validation");
    assert_eq!(fx.engine.list_bookings().await.len(), 1);
}

struct FailingAttach(Arc<InMemoryDirectory>);

#[async_trait]
impl TransactionStore for FailingAttach {
    async fn find_transaction(&self, id: Ulid) -> Result<Option<Transaction>, DirectoryError> {
        self.0.find_transaction(id).await
    }

    async fn update_transaction_booking_id(&self, _: Ulid, _: Ulid) -> Result<(), DirectoryError> {
        Err(DirectoryError::Unavailable("payments offline".into()))
    }
}

#[tokio::test]
async fn failed_attach_leaves_no_booking() {
    let fx = Fixture::new("attach_fail_setup.wal").await;
    let path = test_wal_path("attach_fail.wal");
    let engine = open_engine(
        path.clone(),
        fx.directory.clone(),
        Arc::new(FailingAttach(fx.directory.clone())),
        LinkagePolicy::Overwrite,
    )
    .await;
    engine
        .set_availability(fx.coach, DayOfWeek::Monday, slot(8, 12), true)
        .await
        .unwrap();

    let mut rx = engine.notify.subscribe(fx.coach);

    let err = engine.create_booking(fx.draft(MONDAY, "09:00", "10:00")).await.unwrap_err();
    assert!(err.is_internal());
    assert!(rx.try_recv().is_err());
    assert!(engine.list_bookings().await.is_empty());
    assert!(!engine.has_conflict(fx.coach, date(MONDAY), &slot(9, 10), None).await);

    let reopened = open_engine(path, fx.directory.clone(), fx.directory.clone(), LinkagePolicy::Overwrite).await;
    assert!(reopened.list_bookings().await.is_empty());
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_windows_and_bookings() {
    let fx = Fixture::new("replay.wal").await;
    let window = fx.monday_window().await;
    let kept = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    let cancelled = fx.book(MONDAY, "10:00", "11:00").await.unwrap();
    let dropped = fx.book(MONDAY, "11:00", "12:00").await.unwrap();
    let cancelled = fx.engine.update_status(cancelled.id, BookingStatus::Cancelled).await.unwrap();
    fx.engine.delete_booking(dropped.id).await.unwrap();

    let engine = fx.reopen().await;
    assert_eq!(engine.list_windows().await, vec![window]);
    assert_eq!(engine.list_bookings().await, vec![kept.clone(), cancelled]);
    let err = engine.create_booking(fx.draft(MONDAY, "09:00", "10:00")).await.unwrap_err();
    assert_eq!(err.rule(), "conflict");
    engine.create_booking(fx.draft(MONDAY, "10:00", "11:00")).await.unwrap();
}

#[tokio::test]
async fn compaction_preserves_state() {
    let fx = Fixture::new("compact.wal").await;
    let window = fx.monday_window().await;
    let mut live = Vec::new();
    for hour in 8..12 {
        let b = fx
            .book(MONDAY, &format_wire_hour(hour), &format_wire_hour(hour + 1))
            .await
            .unwrap();
        live.push(b);
    }
    let gone = live.remove(0);
    fx.engine.delete_booking(gone.id).await.unwrap();
    let done = fx.engine.update_status(live[0].id, BookingStatus::Completed).await.unwrap();
    live[0] = done;
    assert_eq!(fx.engine.wal_appends_since_compact().await, 7);

    let written = fx.engine.compact_wal().await.unwrap();
    assert_eq!(written, 1 + live.len());
    assert_eq!(fx.engine.wal_appends_since_compact().await, 0);

    // Writes after compaction land in the new file.
    let extra = fx.book(NEXT_MONDAY, "08:00", "09:00").await.unwrap();
    live.push(extra);

    let engine = fx.reopen().await;
    assert_eq!(engine.list_windows().await, vec![window]);
    assert_eq!(engine.list_bookings().await, live);
}

#[tokio::test]
async fn committed_events_reach_subscribers() {
    let fx = Fixture::new("notify.wal").await;
    let mut rx = fx.engine.notify.subscribe(fx.coach);
    let window = fx.monday_window().await;
    let booking = fx.book(MONDAY, "09:00", "10:00").await.unwrap();
    fx.book(MONDAY, "09:00", "10:00").await.unwrap_err();
    fx.engine.update_status(booking.id, BookingStatus::Completed).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), Event::WindowCreated { window });
    assert_eq!(rx.recv().await.unwrap(), Event::BookingCreated { booking: booking.clone() });
    match rx.recv().await.unwrap() {
        Event::BookingUpdated { booking: updated } => {
            assert_eq!(updated.id, booking.id);
            assert_eq!(updated.status, BookingStatus::Completed);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn watching_requires_an_active_coach() {
    let fx = Fixture::new("watch.wal").await;
    let err = fx.engine.watch_coach(Ulid::new()).await.unwrap_err();
    assert_eq!(err.rule(), "not_found");
    let err = fx.engine.watch_coach(fx.member).await.unwrap_err();
    assert_eq!(err.rule(), "not_found");
    assert_eq!(fx.engine.notify.subscriber_count(&fx.member), 0);

    let watch = fx.engine.watch_coach(fx.coach).await.unwrap();
    assert_eq!(fx.engine.notify.subscriber_count(&fx.coach), 1);
    drop(watch);
    assert_eq!(fx.engine.notify.subscriber_count(&fx.coach), 0);
}
