//! Storage capability consumed by the booking core.
//!
//! Every write goes through a [`RoomTxn`] obtained from
//! [`BookingStore::begin`]. A transaction holds an exclusive lock on one
//! room until it is committed or dropped, so a check-then-insert sequence
//! inside it can never interleave with another writer on that room.
//! Dropping a transaction without calling `commit` discards every staged
//! write.

mod memory;
mod txn;

pub use memory::MemoryStore;
pub(crate) use txn::{CommitSink, IdSequences, StagedTxn};

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::BookingError;
use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A restriction insert would overlap an existing restriction.
    #[error("restriction on room {room_id} overlaps restriction {conflicting}")]
    Exclusion {
        room_id: RoomId,
        conflicting: RestrictionId,
    },
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("WAL writer shut down")]
    WriterGone,
    #[error("commit task failed: {0}")]
    CommitTask(String),
    #[error("injected failure: {0}")]
    Injected(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which reservations a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    Unprocessed,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        match self {
            ReservationFilter::All => true,
            ReservationFilter::Unprocessed => !reservation.processed,
        }
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    // ── Room catalog ─────────────────────────────────────────

    async fn insert_room(&self, name: String) -> Result<Room, StoreError>;

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    // ── Restriction ledger reads ─────────────────────────────

    /// Restrictions of `room_id` overlapping `stay`. `None` if the room
    /// does not exist.
    async fn overlapping_restrictions(
        &self,
        room_id: RoomId,
        stay: &StayRange,
    ) -> Result<Option<Vec<RoomRestriction>>, StoreError>;

    /// Ids of every room holding at least one restriction overlapping `stay`.
    async fn blocked_rooms(&self, stay: &StayRange) -> Result<HashSet<RoomId>, StoreError>;

    async fn get_restriction(
        &self,
        id: RestrictionId,
    ) -> Result<Option<RoomRestriction>, StoreError>;

    // ── Reservation ledger reads ─────────────────────────────

    /// Reservations matching `filter`, in no particular order.
    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<ReservationListing>, StoreError>;

    async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationListing>, StoreError>;

    /// Room a reservation is booked against, if the reservation exists.
    async fn reservation_room(&self, id: ReservationId) -> Result<Option<RoomId>, StoreError>;

    /// Room a restriction belongs to, if the restriction exists.
    async fn restriction_room(&self, id: RestrictionId) -> Result<Option<RoomId>, StoreError>;

    // ── Writes ───────────────────────────────────────────────

    /// Open a transaction scoped to one room, waiting for any other
    /// transaction on that room to finish. `None` if the room does not exist.
    async fn begin(&self, room_id: RoomId) -> Result<Option<Box<dyn RoomTxn>>, StoreError>;
}

/// A unit of work on a single room. Reads see committed state plus the
/// writes staged so far in this transaction.
#[async_trait]
pub trait RoomTxn: Send {
    fn room(&self) -> &Room;

    fn overlapping(&self, stay: &StayRange) -> Vec<RoomRestriction>;

    fn reservation(&self, id: ReservationId) -> Option<Reservation>;

    fn restriction(&self, id: RestrictionId) -> Option<RoomRestriction>;

    fn insert_reservation(&mut self, draft: NewReservation) -> Result<ReservationId, StoreError>;

    fn insert_restriction(&mut self, draft: NewRestriction) -> Result<RestrictionId, StoreError>;

    /// Returns false if the reservation does not exist.
    fn set_processed(&mut self, id: ReservationId, processed: bool) -> Result<bool, StoreError>;

    /// Returns false if the reservation does not exist.
    fn update_guest(&mut self, id: ReservationId, guest: GuestDetails) -> Result<bool, StoreError>;

    /// Deletes the reservation and its linked restrictions. Returns false if
    /// the reservation does not exist.
    fn delete_reservation(&mut self, id: ReservationId) -> Result<bool, StoreError>;

    /// Returns false if the restriction does not exist.
    fn remove_restriction(&mut self, id: RestrictionId) -> Result<bool, StoreError>;

    /// Make every staged write durable and visible, all or nothing.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Run one storage call under the per-operation timeout, converting its
/// outcome into a [`BookingError`].
pub(crate) async fn bounded<T, E, F>(
    op: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, BookingError>
where
    E: Into<BookingError>,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            metrics::counter!(crate::observability::STORAGE_TIMEOUTS_TOTAL, "op" => op)
                .increment(1);
            Err(BookingError::StorageTimeout { op })
        }
    }
}
