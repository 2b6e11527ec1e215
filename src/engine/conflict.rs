use crate::model::*;

use super::EngineError;

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if !range.is_valid() {
        return Err(EngineError::Validation(format!(
            "end date must be after start date, got {range}"
        )));
    }
    Ok(())
}

/// First APPROVED reservation in `room` whose range overlaps `candidate`.
///
/// Only committed bookings count: PENDING and CANCELLED reservations are
/// skipped, so the reservation being approved never conflicts with itself.
pub fn find_conflict<'a>(room: &'a RoomState, candidate: &DateRange) -> Option<&'a Reservation> {
    room.overlapping(candidate)
        .find(|r| r.status == ReservationStatus::Approved)
}

pub fn is_available(room: &RoomState, candidate: &DateRange) -> bool {
    find_conflict(room, candidate).is_none()
}

/// Caller must hold the room's write lock across this check and the status
/// write that follows it.
pub(crate) fn check_no_conflict(
    room: &RoomState,
    id: ReservationId,
    candidate: &DateRange,
) -> Result<(), EngineError> {
    match find_conflict(room, candidate) {
        Some(existing) => Err(EngineError::Conflict {
            id,
            with: existing.id,
        }),
        None => Ok(()),
    }
}
