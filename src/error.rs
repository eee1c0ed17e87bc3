use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{ReservationId, RestrictionId, RoomId};
use crate::store::StoreError;

/// The record a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room(RoomId),
    Reservation(ReservationId),
    Restriction(RestrictionId),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Room(id) => write!(f, "room {id}"),
            Entity::Reservation(id) => write!(f, "reservation {id}"),
            Entity::Restriction(id) => write!(f, "restriction {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid date range: start {start} must be before end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("room {room_id} is not available from {start} to {end}")]
    RoomUnavailable {
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("not found: {0}")]
    NotFound(Entity),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("storage timed out during {op}")]
    StorageTimeout { op: &'static str },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BookingError {
    /// Text safe to show a guest or staff member.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::InvalidRange { .. } => {
                "The departure date must be after the arrival date.".to_string()
            }
            BookingError::RoomUnavailable { .. } => {
                "Sorry, this room is not available for the selected dates.".to_string()
            }
            BookingError::NotFound(Entity::Room(_)) => "That room does not exist.".to_string(),
            BookingError::NotFound(_) => "That reservation could not be found.".to_string(),
            BookingError::LimitExceeded(what) => format!("Please shorten the {what}."),
            BookingError::StorageTimeout { .. } | BookingError::Storage(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
        }
    }

    /// Storage-layer failure. Reads may be retried; a failed `book_room`
    /// must be re-checked before retrying since it may have committed.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            BookingError::StorageTimeout { .. } | BookingError::Storage(_)
        )
    }
}
