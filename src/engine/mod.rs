mod availability;
mod conflict;
mod error;
mod linkage;
mod mutations;
mod queries;
mod scheduler;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{AvailabilityStore, SharedWeek, WindowPatch};
pub use error::{Entity, SchedulingError};
pub use linkage::{LinkagePolicy, TransactionLinkage};
pub use scheduler::{BookingDraft, BookingPatch};
pub use store::{BookingStore, SharedLedger};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::directory::{Role, TransactionStore, User, UserDirectory};
use crate::limits::JOURNAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::notify::{NotifyHub, Subscription};
use crate::observability;
use crate::wal::Wal;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal and group-commits appends:
/// wait for one append, drain whatever else is already queued, write the
/// batch, fsync once, then acknowledge every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch; the whole batch is reported failed either way.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// External systems the scheduler consults.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub transactions: Arc<dyn TransactionStore>,
}

/// Owns both schedule stores, the journal writer and the notify hub.
pub struct Engine {
    pub(super) availability: AvailabilityStore,
    pub(super) bookings: BookingStore,
    pub(super) users: Arc<dyn UserDirectory>,
    pub(super) linkage: TransactionLinkage,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared from before their coach lock until the event is
    /// applied; compaction holds it exclusively so its snapshot matches the log.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    /// Replay the journal at `wal_path` and start its writer task.
    pub async fn open(
        wal_path: PathBuf,
        collaborators: Collaborators,
        linkage: LinkagePolicy,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(JOURNAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            availability: AvailabilityStore::new(),
            bookings: BookingStore::new(),
            users: collaborators.users,
            linkage: TransactionLinkage::new(collaborators.transactions, linkage),
            notify,
            wal_tx,
            commit_gate: RwLock::new(()),
        };

        for event in &events {
            engine.replay_event(event).await;
        }
        metrics::gauge!(observability::COACHES_TRACKED).set(engine.bookings.coach_count() as f64);
        info!(
            "replayed {} journal events from {}",
            events.len(),
            wal_path.display()
        );
        Ok(engine)
    }

    async fn replay_event(&self, event: &Event) {
        match event {
            Event::WindowCreated { .. } | Event::WindowUpdated { .. } | Event::WindowDeleted { .. } => {
                let week = self.availability.week_entry(event.coach_id());
                let mut guard = week.write().await;
                self.availability.apply(&mut guard, event);
            }
            Event::BookingCreated { .. } | Event::BookingUpdated { .. } | Event::BookingDeleted { .. } => {
                let ledger = self.bookings.ledger_entry(event.coach_id());
                let mut guard = ledger.write().await;
                self.bookings.apply(&mut guard, event);
            }
        }
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), SchedulingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| SchedulingError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulingError::Journal("journal writer dropped response".into()))?
            .map_err(|e| SchedulingError::Journal(e.to_string()))
    }

    /// Journal + apply + notify for a booking event. Caller holds the ledger lock.
    pub(super) async fn commit_booking_event(
        &self,
        ledger: &mut CoachLedger,
        event: Event,
    ) -> Result<(), SchedulingError> {
        self.journal_booking_event(ledger, &event).await?;
        self.notify.send(&event);
        Ok(())
    }

    /// Journal + apply without publishing. The caller decides whether the
    /// event is ever announced.
    pub(super) async fn journal_booking_event(
        &self,
        ledger: &mut CoachLedger,
        event: &Event,
    ) -> Result<(), SchedulingError> {
        self.wal_append(event).await?;
        self.bookings.apply(ledger, event);
        Ok(())
    }

    /// Journal + apply + notify for a window event. Caller holds the week lock.
    pub(super) async fn commit_window_event(
        &self,
        week: &mut CoachWeek,
        event: Event,
    ) -> Result<(), SchedulingError> {
        self.wal_append(&event).await?;
        self.availability.apply(week, &event);
        self.notify.send(&event);
        Ok(())
    }

    pub(super) async fn require_user(&self, id: Ulid, role: Role) -> Result<User, SchedulingError> {
        let entity = match role {
            Role::Coach => Entity::Coach,
            Role::Member | Role::Admin => Entity::Member,
        };
        self.users
            .find_active_user(id, role)
            .await?
            .ok_or_else(|| SchedulingError::not_found(entity, id))
    }

    /// Follow committed changes to an active coach's schedule.
    pub async fn watch_coach(&self, coach_id: Ulid) -> Result<Subscription, SchedulingError> {
        self.require_user(coach_id, Role::Coach).await?;
        Ok(self.notify.watch(coach_id))
    }

    /// Rewrite the journal as the minimal set of events recreating current state.
    pub async fn compact_wal(&self) -> Result<usize, SchedulingError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for week in self.availability.weeks() {
            let guard = week.read().await;
            events.extend(guard.windows().map(|w| Event::WindowCreated { window: w.clone() }));
        }
        for ledger in self.bookings.ledgers() {
            let guard = ledger.read().await;
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| SchedulingError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulingError::Journal("journal writer dropped response".into()))?
            .map_err(|e| SchedulingError::Journal(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}