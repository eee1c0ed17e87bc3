use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BookingError;

pub type RoomId = i64;
pub type ReservationId = i64;
pub type RestrictionId = i64;

/// Wall-clock timestamp used for `created_at` / `updated_at`.
pub type Timestamp = DateTime<Utc>;

/// Calendar format used on the JSON surface (`2022-06-20`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open stay interval `[start, end)` of calendar dates.
///
/// A stay ending on day D and another starting on day D do not overlap:
/// checkout and checkin on the same day are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl StayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for StayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Why a room is unavailable. Values mirror the `restrictions` reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestrictionKind {
    Reservation,
    OwnerBlock,
}

impl RestrictionKind {
    pub fn id(&self) -> i64 {
        match self {
            RestrictionKind::Reservation => 1,
            RestrictionKind::OwnerBlock => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Guest-editable fields of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub guest: GuestDetails,
    pub stay: StayRange,
    pub room_id: RoomId,
    pub processed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub stay: StayRange,
    pub room_id: RoomId,
    /// `None` for manual owner blocks.
    pub reservation_id: Option<ReservationId>,
    pub kind: RestrictionKind,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A reservation joined with the display name of its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationListing {
    pub reservation: Reservation,
    pub room_name: String,
}

// ── Boundary inputs ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilitySearchRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub room_id: Option<RoomId>,
}

/// A validated guest booking request from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationSubmission {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub room_id: RoomId,
}

impl ReservationSubmission {
    pub fn guest(&self) -> GuestDetails {
        GuestDetails {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

/// JSON answer for a single-room availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub ok: bool,
    pub message: String,
    pub room_id: RoomId,
    pub start_date: String,
    pub end_date: String,
}

impl AvailabilityResponse {
    pub fn new(room_id: RoomId, stay: &StayRange, available: bool) -> Self {
        Self {
            ok: available,
            message: if available { "Available!" } else { "Not available" }.to_string(),
            room_id,
            start_date: stay.start().format(DATE_FORMAT).to_string(),
            end_date: stay.end().format(DATE_FORMAT).to_string(),
        }
    }
}

// ── Storage drafts ───────────────────────────────────────────────

/// Reservation row before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest: GuestDetails,
    pub stay: StayRange,
    pub room_id: RoomId,
}

/// Restriction row before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRestriction {
    pub stay: StayRange,
    pub room_id: RoomId,
    pub reservation_id: Option<ReservationId>,
    pub kind: RestrictionKind,
}

// ── Per-room state ───────────────────────────────────────────────

/// Everything stored for one room: the catalog row, its restrictions and
/// the reservations booked against it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `stay.start`.
    pub restrictions: Vec<RoomRestriction>,
    pub reservations: BTreeMap<ReservationId, Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
            reservations: BTreeMap::new(),
        }
    }

    /// Insert restriction maintaining sort order by start date.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.stay.start(), |r| r.stay.start())
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    pub fn restriction(&self, id: RestrictionId) -> Option<&RoomRestriction> {
        self.restrictions.iter().find(|r| r.id == id)
    }

    /// Restrictions whose interval overlaps `query`.
    /// Everything from `partition_point` on starts at or after `query.end`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.stay.start() < query.end());
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.stay.end() > query.start())
    }

    pub fn is_free(&self, query: &StayRange) -> bool {
        self.overlapping(query).next().is_none()
    }

    /// Apply a committed event. The caller holds whatever lock guards `self`.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RoomCreated { .. } | Event::SequencesAdvanced { .. } => {}
            Event::ReservationInserted { reservation } => {
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::RestrictionInserted { restriction } => {
                self.insert_restriction(restriction.clone());
            }
            Event::ProcessedSet { id, processed, at, .. } => {
                if let Some(r) = self.reservations.get_mut(id) {
                    r.processed = *processed;
                    r.updated_at = *at;
                }
            }
            Event::GuestUpdated { id, guest, at, .. } => {
                if let Some(r) = self.reservations.get_mut(id) {
                    r.guest = guest.clone();
                    r.updated_at = *at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                self.reservations.remove(id);
                self.restrictions.retain(|r| r.reservation_id != Some(*id));
            }
            Event::RestrictionRemoved { id, .. } => {
                self.remove_restriction(*id);
            }
        }
    }
}

/// Flat event types. A committed transaction is
/// persisted as one WAL frame holding one or more of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    ReservationInserted {
        reservation: Reservation,
    },
    RestrictionInserted {
        restriction: RoomRestriction,
    },
    ProcessedSet {
        id: ReservationId,
        room_id: RoomId,
        processed: bool,
        at: Timestamp,
    },
    GuestUpdated {
        id: ReservationId,
        room_id: RoomId,
        guest: GuestDetails,
        at: Timestamp,
    },
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
    },
    RestrictionRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
    /// Next id of each table. Written at the head of a compacted log so ids
    /// of deleted rows are not handed out again after replay.
    SequencesAdvanced {
        room: RoomId,
        reservation: ReservationId,
        restriction: RestrictionId,
    },
}

impl Event {
    /// Room the event belongs to. `None` for catalog-wide events.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Event::RoomCreated { room } => Some(room.id),
            Event::ReservationInserted { reservation } => Some(reservation.room_id),
            Event::RestrictionInserted { restriction } => Some(restriction.room_id),
            Event::ProcessedSet { room_id, .. }
            | Event::GuestUpdated { room_id, .. }
            | Event::ReservationDeleted { room_id, .. }
            | Event::RestrictionRemoved { room_id, .. } => Some(*room_id),
            Event::SequencesAdvanced { .. } => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn stay_range_rejects_empty_and_inverted() {
        let d = date("2022-06-20");
        assert!(matches!(
            StayRange::new(d, d),
            Err(BookingError::InvalidRange { .. })
        ));
        assert!(StayRange::new(date("2022-06-22"), d).is_err());
        assert_eq!(stay("2022-06-20", "2022-06-22").nights(), 2);
    }

    #[test]
    fn stay_overlap_is_half_open() {
        let booked = stay("2022-06-20", "2022-06-22");
        assert!(booked.overlaps(&stay("2022-06-21", "2022-06-23")));
        assert!(!booked.overlaps(&stay("2022-06-22", "2022-06-24")));
        assert!(!booked.overlaps(&stay("2022-06-18", "2022-06-20")));
        assert!(booked.overlaps(&stay("2022-06-01", "2022-06-30")));
        assert!(booked.overlaps(&stay("2022-06-20", "2022-06-21")));
    }

    #[test]
    fn restrictions_stay_sorted() {
        let mut rs = RoomState::new(room(1, "General's Quarters"));
        rs.insert_restriction(restriction(1, 1, "2022-07-01", "2022-07-03"));
        rs.insert_restriction(restriction(2, 1, "2022-06-01", "2022-06-03"));
        rs.insert_restriction(restriction(3, 1, "2022-06-10", "2022-06-12"));
        let starts: Vec<_> = rs.restrictions.iter().map(|r| r.id).collect();
        assert_eq!(starts, vec![2, 3, 1]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_past() {
        let mut rs = RoomState::new(room(1, "General's Quarters"));
        rs.insert_restriction(restriction(1, 1, "2022-06-01", "2022-06-05"));
        rs.insert_restriction(restriction(2, 1, "2022-06-20", "2022-06-22"));
        rs.insert_restriction(restriction(3, 1, "2022-06-22", "2022-06-25"));

        let hits: Vec<_> = rs
            .overlapping(&stay("2022-06-21", "2022-06-22"))
            .map(|r| r.id)
            .collect();
        assert_eq!(hits, vec![2]);
        assert!(rs.is_free(&stay("2022-06-05", "2022-06-20")));
        assert!(!rs.is_free(&stay("2022-06-04", "2022-06-06")));
    }

    #[test]
    fn deleting_reservation_cascades_its_restrictions() {
        let mut rs = RoomState::new(room(1, "General's Quarters"));
        let now = Utc::now();
        let reservation = Reservation {
            id: 7,
            guest: guest("Asdan"),
            stay: stay("2022-06-20", "2022-06-22"),
            room_id: 1,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let mut linked = restriction(1, 1, "2022-06-20", "2022-06-22");
        linked.reservation_id = Some(7);
        linked.kind = RestrictionKind::Reservation;

        rs.apply(&Event::ReservationInserted { reservation });
        rs.apply(&Event::RestrictionInserted { restriction: linked });
        rs.apply(&Event::RestrictionInserted {
            restriction: restriction(2, 1, "2022-07-01", "2022-07-02"),
        });

        rs.apply(&Event::ReservationDeleted { id: 7, room_id: 1 });
        assert!(rs.reservations.is_empty());
        assert_eq!(rs.restrictions.len(), 1);
        assert_eq!(rs.restrictions[0].id, 2);
    }

    #[test]
    fn availability_response_formats_dates() {
        let resp = AvailabilityResponse::new(1, &stay("2022-06-20", "2022-06-22"), true);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["room_id"], 1);
        assert_eq!(json["start_date"], "2022-06-20");
        assert_eq!(json["end_date"], "2022-06-22");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RestrictionInserted {
            restriction: restriction(4, 2, "2022-06-20", "2022-06-22"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.room_id(), Some(2));
    }
}
