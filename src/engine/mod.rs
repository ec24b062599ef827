mod conflict;
mod day;
mod error;
mod lifecycle;
mod queries;
mod windows;

pub use conflict::{find_exact, find_overlap, is_occupied, occupant};
pub use day::DayState;
pub use error::{ConflictKind, EngineError};

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

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

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync and answers every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut deferred: Option<WalCommand> = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            // Flush what we have before handling it.
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                flush_batch(&mut wal, batch);
            }
            WalCommand::Compact { events, response } => {
                let _ = response.send(wal.compact(&events));
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Always flush, even after a failed append, so partially buffered bytes
    // don't leak into the next batch.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

// ── Day cells ────────────────────────────────────────────

/// One (owner, date). `work` is the critical section that serializes writers
/// and holds the authoritative state; `committed` is the last published copy
/// that readers clone without ever touching `work`.
pub(crate) struct DayCell {
    work: Arc<Mutex<DayState>>,
    committed: StdRwLock<Arc<DayState>>,
}

impl DayCell {
    fn new(state: DayState) -> Self {
        Self {
            committed: StdRwLock::new(Arc::new(state.clone())),
            work: Arc::new(Mutex::new(state)),
        }
    }

    fn snapshot(&self) -> Arc<DayState> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, state: &DayState) {
        *self.committed.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state.clone());
    }
}

type SharedDay = Arc<DayCell>;

/// A held critical section for one day.
pub(crate) struct DayLock {
    cell: SharedDay,
    guard: OwnedMutexGuard<DayState>,
}

impl DayLock {
    fn key(&self) -> DayKey {
        self.guard.key
    }

    fn state(&self) -> &DayState {
        &self.guard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entity {
    Booking,
    Window,
}

// ── Engine ───────────────────────────────────────────────

/// Behavior switches and the injected clock.
#[derive(Clone)]
pub struct EngineOptions {
    /// New bookings start `pending` and wait for the owner to confirm them.
    pub require_approval: bool,
    /// The owning admin may reschedule, not only the requester or a superadmin.
    pub owner_may_reschedule: bool,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            require_approval: false,
            owner_may_reschedule: false,
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct Engine {
    days: DashMap<DayKey, SharedDay>,
    /// Owner → dates that have a day cell, for range scans.
    owner_dates: DashMap<UserId, BTreeSet<NaiveDate>>,
    /// Reverse lookups: entity id → current day.
    booking_index: DashMap<Ulid, DayKey>,
    window_index: DashMap<Ulid, DayKey>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold this shared; compaction holds it exclusively so the
    /// snapshot it writes matches the log exactly.
    commit_barrier: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, options: EngineOptions) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            owner_dates: DashMap::new(),
            booking_index: DashMap::new(),
            window_index: DashMap::new(),
            wal_tx,
            commit_barrier: RwLock::new(()),
            notify,
            options,
        };

        // Rebuild plain states first; no other task can see them yet.
        let mut states: HashMap<DayKey, DayState> = HashMap::new();
        for event in &events {
            for key in event.days() {
                states
                    .entry(key)
                    .or_insert_with(|| DayState::new(key))
                    .apply(event);
            }
            engine.index(event);
        }
        for (key, state) in states {
            engine.install(key, state);
        }

        info!(
            "ledger replayed: {} events, {} days",
            events.len(),
            engine.days.len()
        );
        Ok(engine)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    fn install(&self, key: DayKey, state: DayState) {
        self.days.insert(key, Arc::new(DayCell::new(state)));
        self.owner_dates.entry(key.owner).or_default().insert(key.date);
    }

    /// Get or lazily create the cell for `key`.
    fn day(&self, key: DayKey) -> SharedDay {
        if let Some(cell) = self.days.get(&key) {
            return cell.value().clone();
        }
        let cell = self
            .days
            .entry(key)
            .or_insert_with(|| Arc::new(DayCell::new(DayState::new(key))))
            .value()
            .clone();
        self.owner_dates.entry(key.owner).or_default().insert(key.date);
        cell
    }

    /// Last committed state of a day, if it has ever been written.
    pub fn snapshot(&self, key: DayKey) -> Option<Arc<DayState>> {
        self.days.get(&key).map(|cell| cell.snapshot())
    }

    async fn lock_day(&self, key: DayKey) -> DayLock {
        let cell = self.day(key);
        let guard = cell.work.clone().lock_owned().await;
        DayLock { cell, guard }
    }

    /// Lock two days in key order to prevent deadlocks. The first lock
    /// returned always belongs to `first`; the second is `None` when both
    /// keys are the same day.
    async fn lock_pair(&self, first: DayKey, second: DayKey) -> (DayLock, Option<DayLock>) {
        if first == second {
            return (self.lock_day(first).await, None);
        }
        if first < second {
            let a = self.lock_day(first).await;
            let b = self.lock_day(second).await;
            (a, Some(b))
        } else {
            let b = self.lock_day(second).await;
            let a = self.lock_day(first).await;
            (a, Some(b))
        }
    }

    /// Lookup entity → day, lock it (plus `dest` if given) and confirm the
    /// entity is still there. Retries if it moved while we waited.
    async fn locate(
        &self,
        entity: Entity,
        id: Ulid,
        dest: Option<DayKey>,
    ) -> Result<(DayLock, Option<DayLock>), EngineError> {
        let index = match entity {
            Entity::Booking => &self.booking_index,
            Entity::Window => &self.window_index,
        };
        for _ in 0..MAX_LOCATE_ATTEMPTS {
            let key = index
                .get(&id)
                .map(|e| *e.value())
                .ok_or(EngineError::NotFound(id))?;
            let (home, other) = self.lock_pair(key, dest.unwrap_or(key)).await;
            let present = match entity {
                Entity::Booking => home.state().booking(id).is_some(),
                Entity::Window => home.state().window(id).is_some(),
            };
            if present {
                return Ok((home, other));
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// WAL-append, apply to the held days, publish snapshots, update indexes.
    async fn commit(
        &self,
        event: &Event,
        home: &mut DayLock,
        other: Option<&mut DayLock>,
    ) -> Result<(), EngineError> {
        let _barrier = self.commit_barrier.read().await;
        self.wal_append(event).await?;

        let days = event.days();
        for lock in std::iter::once(home).chain(other) {
            if days.contains(&lock.key()) {
                lock.guard.apply(event);
                lock.cell.publish(&lock.guard);
            }
        }
        self.index(event);
        Ok(())
    }

    fn index(&self, event: &Event) {
        match event {
            Event::WindowPut { window } | Event::WindowUpdated { window, .. } => {
                self.window_index.insert(window.id, window.key());
            }
            Event::WindowRemoved { id, .. } => {
                self.window_index.remove(id);
            }
            Event::BookingCreated { booking } | Event::BookingRescheduled { booking, .. } => {
                self.booking_index.insert(booking.id, booking.key());
            }
            Event::BookingConfirmed { .. }
            | Event::BookingCancelled { .. }
            | Event::MeetingLinkAttached { .. } => {}
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _barrier = self.commit_barrier.write().await;

        let mut keys: Vec<DayKey> = self.days.iter().map(|e| *e.key()).collect();
        keys.sort();
        let mut events = Vec::new();
        for key in keys {
            let Some(day) = self.snapshot(key) else { continue };
            events.extend(day.windows.iter().cloned().map(|window| Event::WindowPut { window }));
            events.extend(
                day.bookings
                    .iter()
                    .cloned()
                    .map(|booking| Event::BookingCreated { booking }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
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
