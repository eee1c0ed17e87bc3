use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{BookingError, Entity};
use crate::limits::MAX_ROOM_NAME_LEN;
use crate::model::{Room, RoomId};
use crate::store::{BookingStore, bounded};

/// Read access to the rooms on offer, plus inserts for seeding.
#[derive(Clone)]
pub struct RoomCatalog {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
}

impl RoomCatalog {
    pub fn new(store: Arc<dyn BookingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Every room, ordered by id.
    pub async fn list(&self) -> Result<Vec<Room>, BookingError> {
        let mut rooms = bounded("list_rooms", self.timeout, self.store.list_rooms()).await?;
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    pub async fn get(&self, id: RoomId) -> Result<Room, BookingError> {
        bounded("get_room", self.timeout, self.store.get_room(id))
            .await?
            .ok_or(BookingError::NotFound(Entity::Room(id)))
    }

    pub async fn add(&self, name: &str) -> Result<Room, BookingError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
            return Err(BookingError::LimitExceeded("room name"));
        }
        let room = bounded(
            "insert_room",
            self.timeout,
            self.store.insert_room(name.to_string()),
        )
        .await?;
        info!(room_id = room.id, name = %room.name, "room added");
        Ok(room)
    }
}
