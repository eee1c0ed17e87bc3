//! Durable [`BookingStore`](crate::store::BookingStore): per-room state in
//! memory, every committed transaction appended to the WAL first.

mod compactor;
mod queries;
#[cfg(test)]
mod tests;

pub use compactor::run_compactor;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::model::*;
use crate::store::{CommitSink, IdSequences, StoreError};
use crate::wal::{Frame, Wal};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        frame: Frame,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        frames: Vec<Frame>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { frame, response } => {
                let mut batch = vec![(frame, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { frame, response }) => batch.push((frame, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    debug!("WAL writer stopped");
}

/// Write and fsync a whole batch. On any failure the log is cut back to
/// where the batch started, so no frame of a failed batch survives a restart.
fn flush_batch(wal: &mut Wal, batch: &[(Frame, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let start = wal.durable_len()?;
    let result = batch
        .iter()
        .try_for_each(|(frame, _)| wal.append_buffered(frame))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        if let Err(rewind_err) = wal.rewind(start) {
            error!(error = %rewind_err, "failed to rewind WAL after write error");
        }
        warn!(error = %e, frames = batch.len(), "WAL batch write failed");
    }
    result
}

fn respond_batch(batch: Vec<(Frame, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
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
        WalCommand::Compact { frames, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &frames).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Send a frame to the group-commit writer and wait until it is durable.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, frame: Frame) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { frame, response: tx })
        .await
        .map_err(|_| StoreError::WriterGone)?;
    rx.await
        .map_err(|_| StoreError::WriterGone)?
        .map_err(|e| StoreError::Wal(e.to_string()))
}

// ── Tables ───────────────────────────────────────────────

pub(crate) struct Tables {
    pub rooms: DashMap<RoomId, SharedRoomState>,
    /// Reverse lookup: reservation id → room id
    pub reservation_to_room: DashMap<ReservationId, RoomId>,
    /// Reverse lookup: restriction id → room id
    pub restriction_to_room: DashMap<RestrictionId, RoomId>,
    pub ids: Arc<IdSequences>,
}

impl Tables {
    fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every room's shared state, ordered by room id.
    fn room_states(&self) -> Vec<SharedRoomState> {
        let mut states: Vec<(RoomId, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states.into_iter().map(|(_, rs)| rs).collect()
    }
}

/// Apply a committed event to a room, keeping the reverse indexes in step.
/// The caller holds the room's write lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, tables: &Tables) {
    match event {
        Event::ReservationInserted { reservation } => {
            tables
                .reservation_to_room
                .insert(reservation.id, reservation.room_id);
        }
        Event::RestrictionInserted { restriction } => {
            tables
                .restriction_to_room
                .insert(restriction.id, restriction.room_id);
        }
        Event::ReservationDeleted { id, .. } => {
            tables.reservation_to_room.remove(id);
            for r in rs.restrictions.iter().filter(|r| r.reservation_id == Some(*id)) {
                tables.restriction_to_room.remove(&r.id);
            }
        }
        Event::RestrictionRemoved { id, .. } => {
            tables.restriction_to_room.remove(id);
        }
        Event::RoomCreated { .. }
        | Event::ProcessedSet { .. }
        | Event::GuestUpdated { .. }
        | Event::SequencesAdvanced { .. } => {}
    }
    rs.apply(event);
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(crate) tables: Arc<Tables>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes room creation against compaction snapshots.
    pub(super) catalog_lock: RwLock<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from within a Tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let frames = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let tables = Tables {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            restriction_to_room: DashMap::new(),
            ids: Arc::new(IdSequences::new()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds
        // instantly. Never use blocking_write here: this may run inside an
        // async context.
        let mut replayed = 0usize;
        for frame in &frames {
            for event in frame {
                tables.ids.observe(event);
                match event {
                    Event::RoomCreated { room } => {
                        let rs = RoomState::new(room.clone());
                        tables.rooms.insert(room.id, Arc::new(RwLock::new(rs)));
                    }
                    other => {
                        if let Some(rs) = other.room_id().and_then(|id| tables.get_room(&id)) {
                            let mut guard = rs.try_write().map_err(io::Error::other)?;
                            apply_to_room(&mut guard, other, &tables);
                        }
                    }
                }
                replayed += 1;
            }
        }
        debug!(path = %wal_path.display(), frames = frames.len(), events = replayed, "WAL replayed");

        Ok(Self {
            tables: Arc::new(tables),
            wal_tx,
            catalog_lock: RwLock::new(()),
        })
    }

    pub(super) async fn lock_room(&self, room_id: RoomId) -> Option<OwnedRwLockWriteGuard<RoomState>> {
        let rs = self.tables.get_room(&room_id)?;
        Some(rs.write_owned().await)
    }
}

/// Commits a transaction on one room: WAL first, then the in-memory apply.
pub(super) struct EngineSink {
    guard: OwnedRwLockWriteGuard<RoomState>,
    tables: Arc<Tables>,
    wal_tx: mpsc::Sender<WalCommand>,
}

#[async_trait]
impl CommitSink for EngineSink {
    async fn commit(self, _work: RoomState, staged: Vec<Event>) -> Result<(), StoreError> {
        let EngineSink {
            mut guard,
            tables,
            wal_tx,
        } = self;
        // The spawned task owns the room lock, so the commit runs to
        // completion even if the caller stops waiting for it.
        let task = tokio::spawn(async move {
            wal_append(&wal_tx, staged.clone()).await?;
            for event in &staged {
                apply_to_room(&mut guard, event, &tables);
            }
            Ok::<(), StoreError>(())
        });
        task.await
            .map_err(|e| StoreError::CommitTask(e.to_string()))?
    }
}
