mod booking;
mod conflict;
mod error;
mod index;
mod ledger;
mod search;
mod stays;

pub use error::EngineError;
pub use index::Calendar;
pub use search::SearchQuery;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::geo::GeoIndex;
use crate::model::*;
use crate::wal::Wal;

pub type SharedStayState = Arc<RwLock<StayState>>;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

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
    #[cfg(test)]
    FailNextSync,
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then fsyncs once and answers every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before running it.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
        // None of these callers gets an Ok, so none of their records may
        // survive a restart.
        if let Err(e) = wal.discard_unsynced() {
            tracing::error!("WAL rollback failed, refusing further appends until compaction: {e}");
        }
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
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
        #[cfg(test)]
        WalCommand::FailNextSync => wal.fail_next_sync(),
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The availability/conflict engine.
///
/// Each stay's calendar and ledger rows live behind that stay's own lock;
/// writers take it exclusively for check → WAL append → apply, so two
/// bookings on one stay are strictly serialized while different stays never
/// contend. Every mutation is a single WAL event applied only after it is
/// durable, so a failed call leaves nothing behind.
pub struct Engine {
    stays: DashMap<StayId, SharedStayState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → stay id
    reservation_to_stay: DashMap<ReservationId, StayId>,
    by_guest: DashMap<String, Vec<ReservationId>>,
    by_host: DashMap<String, Vec<StayId>>,
    /// Shared by committing writers, exclusive for compaction.
    /// Always taken before any stay lock.
    commit_gate: RwLock<()>,
    geo: Arc<dyn GeoIndex>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

fn stay_from_event(event: &Event) -> Option<Stay> {
    match event {
        Event::StayCreated {
            id,
            host,
            name,
            address,
            guest_capacity,
            location,
        } => Some(Stay {
            id: *id,
            host: host.clone(),
            name: name.clone(),
            address: address.clone(),
            guest_capacity: *guest_capacity,
            location: *location,
        }),
        _ => None,
    }
}

/// The stay a reservation or update event touches.
fn event_stay_id(event: &Event) -> Option<StayId> {
    match event {
        Event::ReservationCreated { stay_id, .. }
        | Event::ReservationCancelled { stay_id, .. }
        | Event::ReservationPurged { stay_id, .. } => Some(*stay_id),
        Event::StayUpdated { id, .. } => Some(*id),
        Event::StayCreated { .. } | Event::StayDeleted { .. } => None,
    }
}

impl Engine {
    /// Open the engine on a WAL file, replaying whatever it holds.
    /// Must run inside a tokio runtime: the WAL writer is spawned here.
    pub fn new(wal_path: PathBuf, geo: Arc<dyn GeoIndex>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            stays: DashMap::new(),
            wal_tx,
            reservation_to_stay: DashMap::new(),
            by_guest: DashMap::new(),
            by_host: DashMap::new(),
            commit_gate: RwLock::new(()),
            geo,
            clock: Arc::new(SystemClock),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };

        // Rebuild into plain maps first; nothing else can see them yet.
        let mut replayed: HashMap<StayId, StayState> = HashMap::new();
        for event in &events {
            match event {
                Event::StayCreated { .. } => {
                    if let Some(stay) = stay_from_event(event) {
                        engine.link_stay(&stay);
                        replayed.insert(stay.id, StayState::new(stay));
                    }
                }
                Event::StayDeleted { id } => {
                    if let Some(mut st) = replayed.remove(id) {
                        engine.retire(&mut st);
                    }
                }
                other => {
                    if let Some(stay_id) = event_stay_id(other)
                        && let Some(st) = replayed.get_mut(&stay_id)
                    {
                        engine.apply_to_stay(st, other);
                    }
                }
            }
        }
        for (id, st) in replayed {
            engine.stays.insert(id, Arc::new(RwLock::new(st)));
        }
        metrics::gauge!(crate::observability::STAYS_ACTIVE).set(engine.stays.len() as f64);
        info!(
            "replayed {} events from {}: {} stays, {} reservations",
            events.len(),
            wal_path.display(),
            engine.stays.len(),
            engine.reservation_to_stay.len()
        );

        Ok(engine)
    }

    /// Open using the data directory, WAL file name and lock timeout from `config`.
    pub fn from_config(config: &Config, geo: Arc<dyn GeoIndex>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self::new(config.wal_path(), geo)?.with_lock_timeout(config.lock_timeout()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
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

    fn get_stay_state(&self, id: &StayId) -> Option<SharedStayState> {
        self.stays.get(id).map(|e| e.value().clone())
    }

    /// Enter the commit section. Held for the whole of a mutation.
    async fn commit_section(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// Take a stay's write lock, waiting at most `lock_timeout`.
    async fn lock_stay(&self, stay_id: StayId) -> Result<OwnedRwLockWriteGuard<StayState>, EngineError> {
        let st = self
            .get_stay_state(&stay_id)
            .ok_or(EngineError::StayNotFound(stay_id))?;
        let started = Instant::now();
        let guard = tokio::time::timeout(self.lock_timeout, st.write_owned())
            .await
            .map_err(|_| EngineError::TransientConflict(stay_id))?;
        metrics::histogram!(crate::observability::STAY_LOCK_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if guard.retired {
            return Err(EngineError::StayNotFound(stay_id));
        }
        Ok(guard)
    }

    /// Lookup reservation → stay, then lock the stay for writing.
    async fn resolve_reservation_write(
        &self,
        id: &ReservationId,
    ) -> Result<(StayId, OwnedRwLockWriteGuard<StayState>), EngineError> {
        let stay_id = self
            .reservation_to_stay
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::ReservationNotFound(*id))?;
        match self.lock_stay(stay_id).await {
            Ok(guard) => Ok((stay_id, guard)),
            Err(EngineError::StayNotFound(_)) => Err(EngineError::ReservationNotFound(*id)),
            Err(e) => Err(e),
        }
    }

    /// WAL-append then apply. Caller holds the commit section and the stay lock.
    async fn persist_and_apply(&self, st: &mut StayState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_stay(st, event);
        Ok(())
    }

    /// Apply a per-stay event. Caller holds the stay lock (or owns the state
    /// outright during replay).
    fn apply_to_stay(&self, st: &mut StayState, event: &Event) {
        match event {
            Event::ReservationCreated {
                id,
                stay_id,
                guest,
                range,
            } => {
                let reservation = Reservation {
                    id: *id,
                    stay_id: *stay_id,
                    guest: guest.clone(),
                    range: *range,
                };
                match st.insert_reservation(reservation) {
                    Ok(()) => {
                        self.reservation_to_stay.insert(*id, *stay_id);
                        self.by_guest.entry(guest.clone()).or_default().push(*id);
                    }
                    // Only reachable from a log written by something other
                    // than this engine. Skip the whole reservation.
                    Err(night) => warn!(
                        "skipping reservation {id} on stay {stay_id}: night {night} already taken"
                    ),
                }
            }
            Event::ReservationCancelled { id, .. } | Event::ReservationPurged { id, .. } => {
                if let Some(reservation) = st.remove_reservation(id) {
                    self.unlink_reservation(&reservation);
                }
            }
            Event::StayUpdated {
                name,
                address,
                guest_capacity,
                ..
            } => {
                st.stay.name = name.clone();
                st.stay.address = address.clone();
                st.stay.guest_capacity = *guest_capacity;
            }
            // Creation and deletion are handled at the map level.
            Event::StayCreated { .. } | Event::StayDeleted { .. } => {}
        }
    }

    fn link_stay(&self, stay: &Stay) {
        self.by_host.entry(stay.host.clone()).or_default().push(stay.id);
    }

    fn unlink_reservation(&self, reservation: &Reservation) {
        self.reservation_to_stay.remove(&reservation.id);
        if let Some(mut ids) = self.by_guest.get_mut(&reservation.guest) {
            ids.retain(|id| *id != reservation.id);
        }
        self.by_guest.remove_if(&reservation.guest, |_, ids| ids.is_empty());
    }

    /// Mark a stay deleted and drop everything hanging off it. The caller
    /// removes it from the stay map.
    fn retire(&self, st: &mut StayState) {
        st.retired = true;
        for reservation in std::mem::take(&mut st.reservations).into_values() {
            self.unlink_reservation(&reservation);
        }
        st.calendar = Calendar::new();
        let (id, host) = (st.stay.id, &st.stay.host);
        if let Some(mut ids) = self.by_host.get_mut(host) {
            ids.retain(|s| *s != id);
        }
        self.by_host.remove_if(host, |_, ids| ids.is_empty());
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no writer is between its append and its apply.
        let _gate = self.commit_gate.write().await;

        let snapshot: Vec<SharedStayState> = self.stays.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for st in snapshot {
            let guard = st.read().await;
            if guard.retired {
                continue;
            }
            events.push(guard.stay.created_event());
            events.extend(guard.reservations.values().map(Reservation::created_event));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
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

    /// Make the WAL writer fail the next batch after its bytes reach the file.
    #[cfg(test)]
    pub(crate) async fn fail_next_wal_sync(&self) {
        let _ = self.wal_tx.send(WalCommand::FailNextSync).await;
    }
}
