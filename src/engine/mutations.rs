use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_range};
use super::{Engine, EngineError, UpdateLock, WalCommand};

/// Next status for `reservation` under `transition`, or `WrongState`.
fn check_transition(
    reservation: &Reservation,
    transition: Transition,
) -> Result<ReservationStatus, EngineError> {
    reservation
        .status
        .transition(transition)
        .map_err(|reason| EngineError::WrongState {
            id: reservation.id,
            status: reservation.status,
            reason,
        })
}

impl Engine {
    /// Store a new PENDING reservation under a fresh id.
    pub async fn create_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        if let Some(status) = draft.status {
            return Err(EngineError::Validation(format!(
                "status must be empty on create, got {status}"
            )));
        }
        validate_range(&draft.range)?;

        let _gate = self.compaction_gate.read().await;
        let rs = self.room_or_insert(draft.room_id);
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations in room"));
        }

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            id,
            user_id: draft.user_id,
            room_id: draft.room_id,
            range: draft.range,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            reservation_id = %id,
            room_id = draft.room_id,
            user_id = draft.user_id,
            range = %draft.range,
            "reservation created"
        );

        Ok(Reservation {
            id,
            user_id: draft.user_id,
            room_id: draft.room_id,
            range: draft.range,
            status: ReservationStatus::Pending,
        })
    }

    /// Replace user, room and dates of a PENDING reservation. The stored status
    /// is kept; any status on the draft is ignored.
    pub async fn update_reservation(
        &self,
        id: ReservationId,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;

        // A move creates the target room, so reject doomed updates before
        // that room exists. Rechecked below under the write locks.
        if self.get_room(&draft.room_id).is_none() {
            let guard = self.resolve_reservation_read(&id).await?;
            let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
            check_transition(current, Transition::Update)?;
            validate_range(&draft.range)?;
        }

        let lock = self.resolve_update_lock(&id, draft.room_id).await?;

        let event = Event::ReservationUpdated {
            id,
            user_id: draft.user_id,
            room_id: draft.room_id,
            range: draft.range,
        };
        if let Some(status) = draft.status {
            debug!(reservation_id = %id, %status, "ignoring status on update");
        }

        let updated = match lock {
            UpdateLock::Same(mut guard) => {
                let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
                check_transition(current, Transition::Update)?;
                validate_range(&draft.range)?;
                self.persist_and_apply(&mut guard, &event).await?;
                guard.get(&id).cloned()
            }
            UpdateLock::Move { mut from, mut to } => {
                let current = from.get(&id).ok_or(EngineError::NotFound(id))?;
                check_transition(current, Transition::Update)?;
                validate_range(&draft.range)?;
                if to.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
                    return Err(EngineError::LimitExceeded("too many reservations in room"));
                }
                self.persist_and_move(&mut from, &mut to, &event).await?;
                to.get(&id).cloned()
            }
        };

        let updated = updated.ok_or(EngineError::NotFound(id))?;
        info!(
            reservation_id = %id,
            room_id = updated.room_id,
            user_id = updated.user_id,
            range = %updated.range,
            "reservation updated"
        );
        Ok(updated)
    }

    /// PENDING → CANCELLED. The reservation stays in the store.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        let status = check_transition(current, Transition::Cancel)?;

        let event = Event::StatusChanged { id, room_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation_id = %id, room_id, "reservation cancelled");
        Ok(())
    }

    /// PENDING → APPROVED, provided no APPROVED reservation of the same room
    /// overlaps. The status check, the conflict scan and the status write all
    /// happen under the room's write lock, so two overlapping approvals in one
    /// room can never both succeed.
    pub async fn approve_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?.clone();
        let status = check_transition(&current, Transition::Approve)?;

        if let Err(e) = check_no_conflict(&guard, id, &current.range) {
            metrics::counter!(crate::observability::APPROVAL_CONFLICTS_TOTAL).increment(1);
            warn!(reservation_id = %id, room_id, range = %current.range, "approval rejected: {e}");
            return Err(e);
        }

        let event = Event::StatusChanged { id, room_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_APPROVED_TOTAL).increment(1);
        info!(reservation_id = %id, room_id, range = %current.range, "reservation approved");

        Ok(Reservation { status, ..current })
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state. Blocks mutations for the duration.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::new();
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let guard = rs.read().await;
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    user_id: r.user_id,
                    room_id: r.room_id,
                    range: r.range,
                });
                if r.status != ReservationStatus::Pending {
                    events.push(Event::StatusChanged {
                        id: r.id,
                        room_id: r.room_id,
                        status: r.status,
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
