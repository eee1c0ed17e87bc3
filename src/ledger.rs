use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::error::{BookingError, Entity};
use crate::limits::check_guest;
use crate::model::*;
use crate::store::{BookingStore, ReservationFilter, bounded};

/// Staff-facing query surface over reservations.
#[derive(Clone)]
pub struct ReservationLedger {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
}

impl ReservationLedger {
    pub fn new(store: Arc<dyn BookingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn list(
        &self,
        op: &'static str,
        filter: ReservationFilter,
    ) -> Result<Vec<ReservationListing>, BookingError> {
        let mut listings = bounded(op, self.timeout, self.store.list_reservations(filter))
            .await
            .inspect_err(|e| error!(op, error = %e, "listing reservations failed"))?;
        listings.sort_by_key(|l| (l.reservation.stay.start(), l.reservation.id));
        Ok(listings)
    }

    /// Every reservation with its room name, earliest arrival first.
    pub async fn list_all(&self) -> Result<Vec<ReservationListing>, BookingError> {
        self.list("list_all", ReservationFilter::All).await
    }

    /// Reservations staff have not processed yet, earliest arrival first.
    pub async fn list_unprocessed(&self) -> Result<Vec<ReservationListing>, BookingError> {
        self.list("list_unprocessed", ReservationFilter::Unprocessed)
            .await
    }

    pub async fn get_by_id(&self, id: ReservationId) -> Result<ReservationListing, BookingError> {
        bounded("get_reservation", self.timeout, self.store.get_reservation(id))
            .await
            .inspect_err(|e| {
                error!(reservation_id = id, op = "get_reservation", error = %e, "reservation lookup failed")
            })?
            .ok_or(BookingError::NotFound(Entity::Reservation(id)))
    }

    /// Replace the guest-editable fields of a reservation. The stay and room
    /// are left untouched.
    pub async fn update(&self, id: ReservationId, guest: GuestDetails) -> Result<(), BookingError> {
        check_guest(&guest)?;

        bounded("update_reservation", self.timeout, async {
            let room_id = self
                .store
                .reservation_room(id)
                .await?
                .ok_or(BookingError::NotFound(Entity::Reservation(id)))?;
            let mut txn = self
                .store
                .begin(room_id)
                .await?
                .ok_or(BookingError::NotFound(Entity::Room(room_id)))?;
            if !txn.update_guest(id, guest)? {
                return Err(BookingError::NotFound(Entity::Reservation(id)));
            }
            txn.commit().await?;
            Ok::<_, BookingError>(())
        })
        .await
        .inspect(|_| info!(reservation_id = id, "guest details updated"))
        .inspect_err(|e| {
            if e.is_storage() {
                error!(reservation_id = id, op = "update_reservation", error = %e, "reservation update failed");
            }
        })
    }
}
