use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, error};

use crate::error::{BookingError, Entity};
use crate::model::*;
use crate::observability::{AVAILABILITY_QUERIES_TOTAL, OPERATION_DURATION_SECONDS};
use crate::store::{BookingStore, bounded};

/// Answer to an [`AvailabilitySearchRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The request named a room.
    Room { room_id: RoomId, available: bool },
    /// Every room free for the whole stay.
    Rooms(HashSet<Room>),
}

/// Read-only availability queries over the restriction ledger.
///
/// A room is free for `[start, end)` iff none of its restrictions `r`
/// satisfies `r.start < end && r.end > start`. Storage failures are
/// returned as errors and never reported as "available".
#[derive(Clone)]
pub struct AvailabilityResolver {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
}

impl AvailabilityResolver {
    pub fn new(store: Arc<dyn BookingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn is_room_available(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, BookingError> {
        let stay = StayRange::new(start, end)?;
        let started = Instant::now();
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "query" => "room").increment(1);

        let result = bounded(
            "is_room_available",
            self.timeout,
            self.store.overlapping_restrictions(room_id, &stay),
        )
        .await;
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "is_room_available")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Some(overlapping)) => {
                debug!(room_id, %start, %end, conflicts = overlapping.len(), "availability checked");
                Ok(overlapping.is_empty())
            }
            Ok(None) => Err(BookingError::NotFound(Entity::Room(room_id))),
            Err(e) => {
                error!(room_id, %start, %end, op = "is_room_available", error = %e, "availability check failed");
                Err(e)
            }
        }
    }

    pub async fn find_available_rooms(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<Room>, BookingError> {
        let stay = StayRange::new(start, end)?;
        let started = Instant::now();
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "query" => "all_rooms").increment(1);

        let result = bounded("find_available_rooms", self.timeout, async {
            let rooms = self.store.list_rooms().await?;
            let blocked = self.store.blocked_rooms(&stay).await?;
            Ok::<_, crate::store::StoreError>(
                rooms
                    .into_iter()
                    .filter(|room| !blocked.contains(&room.id))
                    .collect::<HashSet<_>>(),
            )
        })
        .await;
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "find_available_rooms")
            .record(started.elapsed().as_secs_f64());

        result.inspect_err(|e| {
            error!(%start, %end, op = "find_available_rooms", error = %e, "room search failed");
        })
    }

    pub async fn search(
        &self,
        request: AvailabilitySearchRequest,
    ) -> Result<SearchOutcome, BookingError> {
        match request.room_id {
            Some(room_id) => {
                let available = self
                    .is_room_available(room_id, request.start, request.end)
                    .await?;
                Ok(SearchOutcome::Room { room_id, available })
            }
            None => Ok(SearchOutcome::Rooms(
                self.find_available_rooms(request.start, request.end).await?,
            )),
        }
    }

    /// Single-room check shaped for the JSON availability endpoint.
    pub async fn check_room_json(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AvailabilityResponse, BookingError> {
        let available = self.is_room_available(room_id, start, end).await?;
        let stay = StayRange::new(start, end)?;
        Ok(AvailabilityResponse::new(room_id, &stay, available))
    }
}
