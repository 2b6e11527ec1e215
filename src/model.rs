use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE};

/// Store-assigned reservation identifier.
pub type ReservationId = Ulid;
pub type RoomId = i64;
pub type UserId = i64;

/// Half-open date interval `[start, end)`. `end` is the checkout day and is
/// not occupied, so `[d1, d2)` and `[d2, d3)` never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range without checking it. Caller-supplied candidates go through
    /// `is_valid` before they reach the store.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    pub fn nights(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Cancelled,
}

/// Operations that act on an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Update,
    Cancel,
    Approve,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Approved => "APPROVED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(ReservationStatus::Pending),
            "APPROVED" => Some(ReservationStatus::Approved),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }

    /// Status reached by applying `transition`, or why it is not allowed.
    ///
    /// PENDING is the only state with outgoing edges. CANCELLED is terminal,
    /// and an APPROVED reservation can only leave that state through a manager,
    /// which this service does not model.
    pub fn transition(self, transition: Transition) -> Result<ReservationStatus, &'static str> {
        use ReservationStatus::*;
        match (self, transition) {
            (Pending, Transition::Update) => Ok(Pending),
            (Pending, Transition::Cancel) => Ok(Cancelled),
            (Pending, Transition::Approve) => Ok(Approved),
            (_, Transition::Update) => Err("only pending reservations can be modified"),
            (Approved, Transition::Cancel) => {
                Err("cannot cancel an approved reservation, contact a manager")
            }
            (Cancelled, Transition::Cancel) => Err("reservation was already cancelled"),
            (_, Transition::Approve) => Err("only pending reservations can be approved"),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub status: ReservationStatus,
}

/// Caller-supplied reservation fields for create and update.
/// `status` must be empty on create and is ignored on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub status: Option<ReservationStatus>,
}

impl ReservationDraft {
    pub fn new(user_id: UserId, room_id: RoomId, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            user_id,
            room_id,
            range: DateRange::new(start, end),
            status: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub room_id: Option<RoomId>,
    pub user_id: Option<UserId>,
    pub page_size: Option<usize>,
    pub page_number: Option<usize>,
}

impl SearchFilter {
    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn page_number(&self) -> usize {
        self.page_number.unwrap_or(DEFAULT_PAGE_NUMBER)
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.room_id.is_none_or(|room| r.room_id == room)
            && self.user_id.is_none_or(|user| r.user_id == user)
    }
}

/// All reservations of one room, the unit of locking.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    /// Every reservation regardless of status, sorted by `range.start`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by range.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    pub fn contains(&self, id: &ReservationId) -> bool {
        self.get(id).is_some()
    }

    /// Reservations whose range overlaps the query window, any status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query.start)
    }
}

/// Flat event records. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: ReservationId,
        user_id: UserId,
        room_id: RoomId,
        range: DateRange,
    },
    /// Field replacement. Status is never part of an update.
    ReservationUpdated {
        id: ReservationId,
        user_id: UserId,
        room_id: RoomId,
        range: DateRange,
    },
    StatusChanged {
        id: ReservationId,
        room_id: RoomId,
        status: ReservationStatus,
    },
}

impl Event {
    pub fn reservation_id(&self) -> ReservationId {
        match self {
            Event::ReservationCreated { id, .. }
            | Event::ReservationUpdated { id, .. }
            | Event::StatusChanged { id, .. } => *id,
        }
    }

    /// Room the event lands in (the destination room for an update).
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::ReservationCreated { room_id, .. }
            | Event::ReservationUpdated { room_id, .. }
            | Event::StatusChanged { room_id, .. } => *room_id,
        }
    }
}
