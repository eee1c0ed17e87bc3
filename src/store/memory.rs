use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::limits::MAX_ROOMS;
use crate::model::*;

use super::{BookingStore, CommitSink, IdSequences, ReservationFilter, RoomTxn, StagedTxn, StoreError};

type Tables = BTreeMap<RoomId, RoomState>;

#[derive(Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_restriction_inserts: AtomicBool,
    fail_commits: AtomicBool,
    latency_ms: AtomicU64,
}

/// In-memory store for tests. One mutex guards every table, so a
/// transaction serializes against all other access. Failures and latency
/// can be injected to exercise the error paths of the core.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    ids: Arc<IdSequences>,
    faults: Arc<Faults>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(BTreeMap::new())),
            ids: Arc::new(IdSequences::new()),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Make every read fail with `StoreError::Injected`.
    pub fn fail_reads(&self, on: bool) {
        self.faults.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Make restriction inserts inside transactions fail.
    pub fn fail_restriction_inserts(&self, on: bool) {
        self.faults.fail_restriction_inserts.store(on, Ordering::SeqCst);
    }

    /// Make `commit` fail after all writes were staged.
    pub fn fail_commits(&self, on: bool) {
        self.faults.fail_commits.store(on, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn pause(&self) {
        let ms = self.faults.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn read(&self) -> Result<tokio::sync::MutexGuard<'_, Tables>, StoreError> {
        self.pause().await;
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("read"));
        }
        Ok(self.tables.lock().await)
    }
}

struct MemorySink {
    tables: OwnedMutexGuard<Tables>,
    faults: Arc<Faults>,
}

#[async_trait]
impl CommitSink for MemorySink {
    async fn commit(mut self, work: RoomState, _staged: Vec<Event>) -> Result<(), StoreError> {
        if self.faults.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("commit"));
        }
        self.tables.insert(work.room.id, work);
        Ok(())
    }

    fn check_restriction_insert(&self) -> Result<(), StoreError> {
        if self.faults.fail_restriction_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("restriction insert"));
        }
        Ok(())
    }
}

fn listing(rs: &RoomState, reservation: &Reservation) -> ReservationListing {
    ReservationListing {
        reservation: reservation.clone(),
        room_name: rs.room.name.clone(),
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert_room(&self, name: String) -> Result<Room, StoreError> {
        self.pause().await;
        let mut tables = self.tables.lock().await;
        if tables.len() >= MAX_ROOMS {
            return Err(StoreError::Constraint("too many rooms".into()));
        }
        let now = Utc::now();
        let room = Room {
            id: self.ids.next_room(),
            name,
            created_at: now,
            updated_at: now,
        };
        tables.insert(room.id, RoomState::new(room.clone()));
        Ok(room)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let tables = self.read().await?;
        Ok(tables.values().map(|rs| rs.room.clone()).collect())
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        let tables = self.read().await?;
        Ok(tables.get(&id).map(|rs| rs.room.clone()))
    }

    async fn overlapping_restrictions(
        &self,
        room_id: RoomId,
        stay: &StayRange,
    ) -> Result<Option<Vec<RoomRestriction>>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .get(&room_id)
            .map(|rs| rs.overlapping(stay).cloned().collect()))
    }

    async fn blocked_rooms(&self, stay: &StayRange) -> Result<HashSet<RoomId>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .values()
            .filter(|rs| !rs.is_free(stay))
            .map(|rs| rs.room.id)
            .collect())
    }

    async fn get_restriction(
        &self,
        id: RestrictionId,
    ) -> Result<Option<RoomRestriction>, StoreError> {
        let tables = self.read().await?;
        Ok(tables.values().find_map(|rs| rs.restriction(id).cloned()))
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<ReservationListing>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .values()
            .flat_map(|rs| {
                rs.reservations
                    .values()
                    .filter(|r| filter.matches(r))
                    .map(|r| listing(rs, r))
            })
            .collect())
    }

    async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationListing>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .values()
            .find_map(|rs| rs.reservations.get(&id).map(|r| listing(rs, r))))
    }

    async fn reservation_room(&self, id: ReservationId) -> Result<Option<RoomId>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .values()
            .find(|rs| rs.reservations.contains_key(&id))
            .map(|rs| rs.room.id))
    }

    async fn restriction_room(&self, id: RestrictionId) -> Result<Option<RoomId>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .values()
            .find(|rs| rs.restriction(id).is_some())
            .map(|rs| rs.room.id))
    }

    async fn begin(&self, room_id: RoomId) -> Result<Option<Box<dyn RoomTxn>>, StoreError> {
        self.pause().await;
        let tables = self.tables.clone().lock_owned().await;
        let Some(work) = tables.get(&room_id).cloned() else {
            return Ok(None);
        };
        let sink = MemorySink {
            tables,
            faults: self.faults.clone(),
        };
        Ok(Some(Box::new(StagedTxn::new(work, self.ids.clone(), sink))))
    }
}
