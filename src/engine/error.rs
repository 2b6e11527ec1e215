use thiserror::Error;

use crate::model::{ReservationId, ReservationStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),

    /// Malformed caller input: a status on create, an empty date range,
    /// a bad page request.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation is not legal from the reservation's current status.
    #[error("reservation {id} is {status}: {reason}")]
    WrongState {
        id: ReservationId,
        status: ReservationStatus,
        reason: &'static str,
    },

    /// Approving `id` would overlap the approved reservation `with`.
    #[error("reservation {id} conflicts with approved reservation {with}")]
    Conflict {
        id: ReservationId,
        with: ReservationId,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}
