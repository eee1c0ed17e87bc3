use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::limits::MAX_RESTRICTIONS_PER_ROOM;
use crate::model::*;

use super::{RoomTxn, StoreError};

/// Id generators for the three tables. Ids handed out to a transaction that
/// later rolls back are never reused.
pub(crate) struct IdSequences {
    room: AtomicI64,
    reservation: AtomicI64,
    restriction: AtomicI64,
}

impl IdSequences {
    pub fn new() -> Self {
        Self {
            room: AtomicI64::new(1),
            reservation: AtomicI64::new(1),
            restriction: AtomicI64::new(1),
        }
    }

    pub fn next_room(&self) -> RoomId {
        self.room.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_reservation(&self) -> ReservationId {
        self.reservation.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_restriction(&self) -> RestrictionId {
        self.restriction.fetch_add(1, Ordering::Relaxed)
    }

    /// Advance past any id carried by a replayed event.
    pub fn observe(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => {
                self.room.fetch_max(room.id + 1, Ordering::Relaxed);
            }
            Event::ReservationInserted { reservation } => {
                self.reservation
                    .fetch_max(reservation.id + 1, Ordering::Relaxed);
            }
            Event::RestrictionInserted { restriction } => {
                self.restriction
                    .fetch_max(restriction.id + 1, Ordering::Relaxed);
            }
            Event::SequencesAdvanced {
                room,
                reservation,
                restriction,
            } => {
                self.room.fetch_max(*room, Ordering::Relaxed);
                self.reservation.fetch_max(*reservation, Ordering::Relaxed);
                self.restriction.fetch_max(*restriction, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// The next id of every table, as an event replay can restore.
    pub fn snapshot(&self) -> Event {
        Event::SequencesAdvanced {
            room: self.room.load(Ordering::Relaxed),
            reservation: self.reservation.load(Ordering::Relaxed),
            restriction: self.restriction.load(Ordering::Relaxed),
        }
    }
}

/// Where a [`StagedTxn`] sends its writes on commit.
#[async_trait]
pub(crate) trait CommitSink: Send + 'static {
    /// Persist `staged` and publish `work` as the room's new committed state.
    async fn commit(self, work: RoomState, staged: Vec<Event>) -> Result<(), StoreError>;

    /// Hook run before each restriction insert is staged.
    fn check_restriction_insert(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Transaction over a private working copy of one room. Writes are applied
/// to the copy and recorded as events; nothing escapes until `commit`.
pub(crate) struct StagedTxn<C> {
    work: RoomState,
    staged: Vec<Event>,
    ids: Arc<IdSequences>,
    sink: C,
}

impl<C: CommitSink> StagedTxn<C> {
    pub fn new(work: RoomState, ids: Arc<IdSequences>, sink: C) -> Self {
        Self {
            work,
            staged: Vec::new(),
            ids,
            sink,
        }
    }

    fn stage(&mut self, event: Event) {
        self.work.apply(&event);
        self.staged.push(event);
    }

    fn check_room(&self, room_id: RoomId) -> Result<(), StoreError> {
        if room_id != self.work.room.id {
            return Err(StoreError::Constraint(format!(
                "row for room {room_id} written in transaction on room {}",
                self.work.room.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<C: CommitSink> RoomTxn for StagedTxn<C> {
    fn room(&self) -> &Room {
        &self.work.room
    }

    fn overlapping(&self, stay: &StayRange) -> Vec<RoomRestriction> {
        self.work.overlapping(stay).cloned().collect()
    }

    fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.work.reservations.get(&id).cloned()
    }

    fn restriction(&self, id: RestrictionId) -> Option<RoomRestriction> {
        self.work.restriction(id).cloned()
    }

    fn insert_reservation(&mut self, draft: NewReservation) -> Result<ReservationId, StoreError> {
        self.check_room(draft.room_id)?;
        let now = Utc::now();
        let id = self.ids.next_reservation();
        self.stage(Event::ReservationInserted {
            reservation: Reservation {
                id,
                guest: draft.guest,
                stay: draft.stay,
                room_id: draft.room_id,
                processed: false,
                created_at: now,
                updated_at: now,
            },
        });
        Ok(id)
    }

    fn insert_restriction(&mut self, draft: NewRestriction) -> Result<RestrictionId, StoreError> {
        self.check_room(draft.room_id)?;
        self.sink.check_restriction_insert()?;
        if self.work.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(StoreError::Constraint(format!(
                "room {} holds too many restrictions",
                draft.room_id
            )));
        }
        if let Some(rid) = draft.reservation_id
            && !self.work.reservations.contains_key(&rid)
        {
            return Err(StoreError::Constraint(format!(
                "restriction references missing reservation {rid}"
            )));
        }
        if let Some(existing) = self.work.overlapping(&draft.stay).next() {
            return Err(StoreError::Exclusion {
                room_id: draft.room_id,
                conflicting: existing.id,
            });
        }

        let now = Utc::now();
        let id = self.ids.next_restriction();
        self.stage(Event::RestrictionInserted {
            restriction: RoomRestriction {
                id,
                stay: draft.stay,
                room_id: draft.room_id,
                reservation_id: draft.reservation_id,
                kind: draft.kind,
                created_at: now,
                updated_at: now,
            },
        });
        Ok(id)
    }

    fn set_processed(&mut self, id: ReservationId, processed: bool) -> Result<bool, StoreError> {
        let Some(current) = self.work.reservations.get(&id) else {
            return Ok(false);
        };
        if current.processed != processed {
            self.stage(Event::ProcessedSet {
                id,
                room_id: self.work.room.id,
                processed,
                at: Utc::now(),
            });
        }
        Ok(true)
    }

    fn update_guest(&mut self, id: ReservationId, guest: GuestDetails) -> Result<bool, StoreError> {
        if !self.work.reservations.contains_key(&id) {
            return Ok(false);
        }
        self.stage(Event::GuestUpdated {
            id,
            room_id: self.work.room.id,
            guest,
            at: Utc::now(),
        });
        Ok(true)
    }

    fn delete_reservation(&mut self, id: ReservationId) -> Result<bool, StoreError> {
        if !self.work.reservations.contains_key(&id) {
            return Ok(false);
        }
        self.stage(Event::ReservationDeleted {
            id,
            room_id: self.work.room.id,
        });
        Ok(true)
    }

    fn remove_restriction(&mut self, id: RestrictionId) -> Result<bool, StoreError> {
        if self.work.restriction(id).is_none() {
            return Ok(false);
        }
        self.stage(Event::RestrictionRemoved {
            id,
            room_id: self.work.room.id,
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        if this.staged.is_empty() {
            return Ok(());
        }
        this.sink.commit(this.work, this.staged).await
    }
}
