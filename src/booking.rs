use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{error, info};

use crate::error::{BookingError, Entity};
use crate::limits::check_guest;
use crate::mail::{MailData, MailQueue};
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, OPERATION_DURATION_SECONDS, booking_status};
use crate::store::{BookingStore, RoomTxn, StoreError, bounded};

/// Sender and owner addresses used for booking mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddresses {
    pub from: String,
    pub owner: String,
}

/// The write path for reservations and room blocks.
///
/// Each operation runs as one room-scoped transaction: the availability
/// check and the inserts it guards cannot interleave with another writer on
/// the same room, and a failure at any step leaves no trace.
#[derive(Clone)]
pub struct BookingOrchestrator {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
    mail: MailQueue,
    addresses: MailAddresses,
}

/// An exclusion violation from the store means another restriction got
/// there first.
fn unavailable_on_exclusion(e: StoreError, room_id: RoomId, stay: &StayRange) -> BookingError {
    match e {
        StoreError::Exclusion { .. } => unavailable(room_id, stay),
        other => other.into(),
    }
}

fn unavailable(room_id: RoomId, stay: &StayRange) -> BookingError {
    BookingError::RoomUnavailable {
        room_id,
        start: stay.start(),
        end: stay.end(),
    }
}

impl BookingOrchestrator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        timeout: Duration,
        mail: MailQueue,
        addresses: MailAddresses,
    ) -> Self {
        Self {
            store,
            timeout,
            mail,
            addresses,
        }
    }

    async fn begin(&self, room_id: RoomId) -> Result<Box<dyn RoomTxn>, BookingError> {
        self.store
            .begin(room_id)
            .await?
            .ok_or(BookingError::NotFound(Entity::Room(room_id)))
    }

    /// Book a room for a guest. Returns the new reservation id.
    ///
    /// On `StorageTimeout` the outcome is unknown: the booking may have
    /// committed. Callers should look it up before retrying.
    pub async fn book_room(
        &self,
        submission: ReservationSubmission,
    ) -> Result<ReservationId, BookingError> {
        let started = Instant::now();
        let room_id = submission.room_id;
        let result = self.try_book(&submission).await;

        metrics::counter!(BOOKINGS_TOTAL, "status" => booking_status(&result)).increment(1);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "book_room")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok((reservation, room_name)) => {
                info!(
                    reservation_id = reservation.id,
                    room_id,
                    start = %reservation.stay.start(),
                    end = %reservation.stay.end(),
                    "room booked"
                );
                self.mail.enqueue(MailData::guest_confirmation(
                    &reservation,
                    &room_name,
                    &self.addresses.from,
                ));
                self.mail.enqueue(MailData::owner_notification(
                    &reservation,
                    &room_name,
                    &self.addresses.from,
                    &self.addresses.owner,
                ));
                Ok(reservation.id)
            }
            Err(e) => {
                if e.is_storage() {
                    error!(
                        room_id,
                        start = %submission.start,
                        end = %submission.end,
                        op = "book_room",
                        error = %e,
                        "booking failed"
                    );
                } else {
                    info!(room_id, start = %submission.start, end = %submission.end, reason = %e, "booking rejected");
                }
                Err(e)
            }
        }
    }

    async fn try_book(
        &self,
        submission: &ReservationSubmission,
    ) -> Result<(Reservation, String), BookingError> {
        let stay = StayRange::new(submission.start, submission.end)?;
        let guest = submission.guest();
        check_guest(&guest)?;
        let room_id = submission.room_id;

        bounded("book_room", self.timeout, async {
            let mut txn = self.begin(room_id).await?;
            if !txn.overlapping(&stay).is_empty() {
                return Err(unavailable(room_id, &stay));
            }

            let reservation_id = txn.insert_reservation(NewReservation {
                guest,
                stay,
                room_id,
            })?;
            txn.insert_restriction(NewRestriction {
                stay,
                room_id,
                reservation_id: Some(reservation_id),
                kind: RestrictionKind::Reservation,
            })
            .map_err(|e| unavailable_on_exclusion(e, room_id, &stay))?;

            let reservation = txn.reservation(reservation_id).ok_or_else(|| {
                StoreError::Constraint(format!("reservation {reservation_id} vanished before commit"))
            })?;
            let room_name = txn.room().name.clone();
            txn.commit()
                .await
                .map_err(|e| unavailable_on_exclusion(e, room_id, &stay))?;
            Ok::<_, BookingError>((reservation, room_name))
        })
        .await
    }

    /// Open a transaction on the reservation's room and apply `edit`, which
    /// returns false when the reservation is gone.
    async fn edit_reservation<F>(
        &self,
        op: &'static str,
        id: ReservationId,
        edit: F,
    ) -> Result<(), BookingError>
    where
        F: FnOnce(&mut dyn RoomTxn) -> Result<bool, StoreError> + Send,
    {
        bounded(op, self.timeout, async {
            let room_id = self
                .store
                .reservation_room(id)
                .await?
                .ok_or(BookingError::NotFound(Entity::Reservation(id)))?;
            let mut txn = self.begin(room_id).await?;
            if !edit(txn.as_mut())? {
                return Err(BookingError::NotFound(Entity::Reservation(id)));
            }
            txn.commit().await?;
            Ok::<_, BookingError>(())
        })
        .await
        .inspect_err(|e| {
            if e.is_storage() {
                error!(reservation_id = id, op, error = %e, "reservation update failed");
            }
        })
    }

    /// Mark a reservation processed or pending. Setting the current value
    /// again succeeds without writing.
    pub async fn update_processed_status(
        &self,
        id: ReservationId,
        processed: bool,
    ) -> Result<(), BookingError> {
        self.edit_reservation("update_processed", id, |txn| txn.set_processed(id, processed))
            .await?;
        info!(reservation_id = id, processed, "processed status set");
        Ok(())
    }

    /// Delete a reservation together with the restrictions it owns.
    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), BookingError> {
        self.edit_reservation("delete_reservation", id, |txn| txn.delete_reservation(id))
            .await?;
        info!(reservation_id = id, "reservation deleted");
        Ok(())
    }

    /// Block a room for `[start, end)` without a reservation.
    pub async fn block_room(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RestrictionId, BookingError> {
        let stay = StayRange::new(start, end)?;

        let id = bounded("block_room", self.timeout, async {
            let mut txn = self.begin(room_id).await?;
            if !txn.overlapping(&stay).is_empty() {
                return Err(unavailable(room_id, &stay));
            }
            let id = txn
                .insert_restriction(NewRestriction {
                    stay,
                    room_id,
                    reservation_id: None,
                    kind: RestrictionKind::OwnerBlock,
                })
                .map_err(|e| unavailable_on_exclusion(e, room_id, &stay))?;
            txn.commit().await?;
            Ok::<_, BookingError>(id)
        })
        .await
        .inspect_err(|e| {
            if e.is_storage() {
                error!(room_id, %start, %end, op = "block_room", error = %e, "block failed");
            }
        })?;

        info!(restriction_id = id, room_id, %start, %end, "room blocked");
        Ok(id)
    }

    /// Remove an owner block. Restrictions that belong to a reservation are
    /// only removed by deleting the reservation.
    pub async fn remove_block(&self, restriction_id: RestrictionId) -> Result<(), BookingError> {
        let not_found = || BookingError::NotFound(Entity::Restriction(restriction_id));

        bounded("remove_block", self.timeout, async {
            let room_id = self
                .store
                .restriction_room(restriction_id)
                .await?
                .ok_or_else(not_found)?;
            let mut txn = self.begin(room_id).await?;
            match txn.restriction(restriction_id) {
                Some(r) if r.reservation_id.is_none() => {}
                _ => return Err(not_found()),
            }
            txn.remove_restriction(restriction_id)?;
            txn.commit().await?;
            Ok::<_, BookingError>(())
        })
        .await?;

        info!(restriction_id, "room block removed");
        Ok(())
    }
}
