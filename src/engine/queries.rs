use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::limits::MAX_ROOMS;
use crate::model::*;
use crate::store::{BookingStore, ReservationFilter, RoomTxn, StagedTxn, StoreError};

use super::{Engine, EngineSink, wal_append};

impl Engine {
    /// Read one reservation together with its room name.
    async fn read_reservation(&self, id: ReservationId) -> Option<ReservationListing> {
        let room_id = *self.tables.reservation_to_room.get(&id)?.value();
        let rs = self.tables.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.reservations.get(&id).map(|r| ReservationListing {
            reservation: r.clone(),
            room_name: guard.room.name.clone(),
        })
    }
}

#[async_trait]
impl BookingStore for Engine {
    async fn insert_room(&self, name: String) -> Result<Room, StoreError> {
        let _catalog = self.catalog_lock.write().await;
        if self.tables.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::Constraint("too many rooms".into()));
        }
        let now = Utc::now();
        let room = Room {
            id: self.tables.ids.next_room(),
            name,
            created_at: now,
            updated_at: now,
        };
        wal_append(&self.wal_tx, vec![Event::RoomCreated { room: room.clone() }]).await?;
        self.tables
            .rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        Ok(room)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms = Vec::new();
        for rs in self.tables.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        Ok(rooms)
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        let Some(rs) = self.tables.get_room(&id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(Some(guard.room.clone()))
    }

    async fn overlapping_restrictions(
        &self,
        room_id: RoomId,
        stay: &StayRange,
    ) -> Result<Option<Vec<RoomRestriction>>, StoreError> {
        let Some(rs) = self.tables.get_room(&room_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(Some(guard.overlapping(stay).cloned().collect()))
    }

    async fn blocked_rooms(&self, stay: &StayRange) -> Result<HashSet<RoomId>, StoreError> {
        let mut blocked = HashSet::new();
        for rs in self.tables.room_states() {
            let guard = rs.read().await;
            if !guard.is_free(stay) {
                blocked.insert(guard.room.id);
            }
        }
        Ok(blocked)
    }

    async fn get_restriction(
        &self,
        id: RestrictionId,
    ) -> Result<Option<RoomRestriction>, StoreError> {
        let Some(room_id) = self.restriction_room(id).await? else {
            return Ok(None);
        };
        let Some(rs) = self.tables.get_room(&room_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard.restriction(id).cloned())
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<ReservationListing>, StoreError> {
        let mut out = Vec::new();
        for rs in self.tables.room_states() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .values()
                    .filter(|r| filter.matches(r))
                    .map(|r| ReservationListing {
                        reservation: r.clone(),
                        room_name: guard.room.name.clone(),
                    }),
            );
        }
        Ok(out)
    }

    async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationListing>, StoreError> {
        Ok(self.read_reservation(id).await)
    }

    async fn reservation_room(&self, id: ReservationId) -> Result<Option<RoomId>, StoreError> {
        Ok(self.tables.reservation_to_room.get(&id).map(|e| *e.value()))
    }

    async fn restriction_room(&self, id: RestrictionId) -> Result<Option<RoomId>, StoreError> {
        Ok(self.tables.restriction_to_room.get(&id).map(|e| *e.value()))
    }

    async fn begin(&self, room_id: RoomId) -> Result<Option<Box<dyn RoomTxn>>, StoreError> {
        let Some(guard) = self.lock_room(room_id).await else {
            return Ok(None);
        };
        let work = RoomState::clone(&guard);
        let sink = EngineSink {
            guard,
            tables: self.tables.clone(),
            wal_tx: self.wal_tx.clone(),
        };
        Ok(Some(Box::new(StagedTxn::new(
            work,
            self.tables.ids.clone(),
            sink,
        ))))
    }
}
