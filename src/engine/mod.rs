mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_ranges, merge_overlapping, subtract_ranges};
pub use conflict::{find_conflict, is_available};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{
    broadcast, mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub(super) type RoomWriteGuard = OwnedRwLockWriteGuard<RoomState>;
pub(super) type RoomReadGuard = OwnedRwLockReadGuard<RoomState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), "WAL flush failed: {e}");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation lifecycle service.
///
/// State is partitioned by room. Each room sits behind its own `RwLock` and
/// every mutation of a reservation holds the write lock of the room it
/// belongs to for the whole read-check-write sequence, WAL append included.
pub struct Engine {
    pub rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → room currently holding it.
    pub(super) reservation_to_room: DashMap<ReservationId, RoomId>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an in-flight append.
    pub(super) compaction_gate: RwLock<()>,
}

/// Locks taken for an update, depending on whether it moves rooms.
pub(super) enum UpdateLock {
    Same(RoomWriteGuard),
    Move {
        from: RoomWriteGuard,
        to: RoomWriteGuard,
    },
}

/// Apply an event to the room holding the reservation (no locking, caller
/// holds the lock). Room-changing updates go through `move_between_rooms`.
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<ReservationId, RoomId>) {
    match event {
        Event::ReservationCreated {
            id,
            user_id,
            room_id,
            range,
        } => {
            rs.insert_reservation(Reservation {
                id: *id,
                user_id: *user_id,
                room_id: *room_id,
                range: *range,
                status: ReservationStatus::Pending,
            });
            index.insert(*id, *room_id);
        }
        Event::ReservationUpdated {
            id,
            user_id,
            range,
            ..
        } => {
            // Re-insert so the room stays sorted by start date.
            if let Some(mut existing) = rs.remove_reservation(*id) {
                existing.user_id = *user_id;
                existing.range = *range;
                rs.insert_reservation(existing);
            }
        }
        Event::StatusChanged { id, status, .. } => {
            if let Some(r) = rs.get_mut(id) {
                r.status = *status;
            }
        }
    }
}

fn move_between_rooms(
    from: &mut RoomState,
    to: &mut RoomState,
    event: &Event,
    index: &DashMap<ReservationId, RoomId>,
) {
    if let Event::ReservationUpdated {
        id,
        user_id,
        room_id,
        range,
    } = event
        && let Some(mut existing) = from.remove_reservation(*id) {
            existing.user_id = *user_id;
            existing.room_id = *room_id;
            existing.range = *range;
            to.insert_reservation(existing);
            index.insert(*id, *room_id);
        }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let (wal, events) = Wal::open_and_replay(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_room: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // Replay events. We're the sole owner of these Arcs, so try_write
        // always succeeds instantly. Never use blocking_write here because this
        // runs inside an async context.
        for event in &events {
            match event {
                Event::ReservationUpdated { id, room_id, .. } => {
                    let Some(current) = engine.get_room_for_reservation(id) else {
                        continue;
                    };
                    let from = engine.room_or_insert(current);
                    let mut from_guard = from.try_write().expect("replay: uncontended write");
                    if current == *room_id {
                        apply_to_room(&mut from_guard, event, &engine.reservation_to_room);
                    } else {
                        let to = engine.room_or_insert(*room_id);
                        let mut to_guard = to.try_write().expect("replay: uncontended write");
                        move_between_rooms(
                            &mut from_guard,
                            &mut to_guard,
                            event,
                            &engine.reservation_to_room,
                        );
                    }
                }
                other => {
                    let rs = engine.room_or_insert(other.room_id());
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_to_room(&mut guard, other, &engine.reservation_to_room);
                }
            }
        }

        tracing::info!(
            events = events.len(),
            rooms = engine.rooms.len(),
            reservations = engine.reservation_to_room.len(),
            "engine state restored from WAL"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, room_id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(room_id).map(|e| e.value().clone())
    }

    pub fn get_room_for_reservation(&self, id: &ReservationId) -> Option<RoomId> {
        self.reservation_to_room.get(id).map(|e| *e.value())
    }

    /// Rooms come into existence with their first reservation.
    pub(super) fn room_or_insert(&self, room_id: RoomId) -> SharedRoomState {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomState::new(room_id))))
            .value()
            .clone()
    }

    /// Subscribe to every event applied to a room.
    pub fn subscribe(&self, room_id: RoomId) -> broadcast::Receiver<Event> {
        self.notify.subscribe(room_id)
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room);
        self.notify.send(rs.room_id, event);
        Ok(())
    }

    /// Same as `persist_and_apply` for an update that changes rooms.
    pub(super) async fn persist_and_move(
        &self,
        from: &mut RoomState,
        to: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        move_between_rooms(from, to, event, &self.reservation_to_room);
        self.notify.send(from.room_id, event);
        self.notify.send(to.room_id, event);
        Ok(())
    }

    /// Lookup reservation → room, acquire that room's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &ReservationId,
    ) -> Result<(RoomId, RoomWriteGuard), EngineError> {
        loop {
            let room_id = self
                .get_room_for_reservation(id)
                .ok_or(EngineError::NotFound(*id))?;
            let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(*id))?;
            let guard = rs.write_owned().await;
            // The reservation may have moved rooms between lookup and lock.
            if guard.contains(id) {
                return Ok((room_id, guard));
            }
        }
    }

    pub(super) async fn resolve_reservation_read(
        &self,
        id: &ReservationId,
    ) -> Result<RoomReadGuard, EngineError> {
        loop {
            let room_id = self
                .get_room_for_reservation(id)
                .ok_or(EngineError::NotFound(*id))?;
            let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(*id))?;
            let guard = rs.read_owned().await;
            if guard.contains(id) {
                return Ok(guard);
            }
        }
    }

    /// Acquire the locks an update to `target` room needs: the current room
    /// alone, or both rooms when the reservation moves.
    pub(super) async fn resolve_update_lock(
        &self,
        id: &ReservationId,
        target: RoomId,
    ) -> Result<UpdateLock, EngineError> {
        loop {
            let current = self
                .get_room_for_reservation(id)
                .ok_or(EngineError::NotFound(*id))?;
            let from_rs = self.get_room(&current).ok_or(EngineError::NotFound(*id))?;

            if current == target {
                let guard = from_rs.write_owned().await;
                if guard.contains(id) {
                    return Ok(UpdateLock::Same(guard));
                }
                continue;
            }

            let to_rs = self.room_or_insert(target);
            // Acquire write locks in ascending room order to prevent deadlocks.
            let (from, to) = if current < target {
                let from = from_rs.write_owned().await;
                let to = to_rs.write_owned().await;
                (from, to)
            } else {
                let to = to_rs.write_owned().await;
                let from = from_rs.write_owned().await;
                (from, to)
            };
            if from.contains(id) {
                return Ok(UpdateLock::Move { from, to });
            }
        }
    }
}
