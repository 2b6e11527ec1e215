use crate::limits::*;
use crate::model::*;

use super::availability::free_ranges;
use super::conflict::validate_range;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let guard = self.resolve_reservation_read(&id).await?;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// One page of reservations matching the filter, ordered by id (which is
    /// creation order, ids being ULIDs).
    pub async fn search_reservations(
        &self,
        filter: &SearchFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        let page_size = filter.page_size();
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(EngineError::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }
        let offset = filter
            .page_number()
            .checked_mul(page_size)
            .ok_or_else(|| EngineError::Validation("page number too large".into()))?;

        let rooms: Vec<_> = match filter.room_id {
            Some(room_id) => self.get_room(&room_id).into_iter().collect(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };

        let mut matches = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            matches.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned(),
            );
        }

        // Rooms are read one at a time, so a reservation moving between two of
        // them mid-scan can be seen twice.
        matches.sort_by_key(|r| r.id);
        matches.dedup_by_key(|r| r.id);

        Ok(matches.into_iter().skip(offset).take(page_size).collect())
    }

    /// Parts of `window` in which the room has no APPROVED reservation.
    /// A room nobody has booked yet is free for the whole window.
    pub async fn room_availability(
        &self,
        room_id: RoomId,
        window: DateRange,
        min_nights: Option<i64>,
    ) -> Result<Vec<DateRange>, EngineError> {
        validate_range(&window)?;
        if window.nights() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let mut free = match self.get_room(&room_id) {
            Some(rs) => {
                let guard = rs.read().await;
                free_ranges(&guard, &window)
            }
            None => vec![window],
        };

        if let Some(min) = min_nights {
            free.retain(|r| r.nights() >= min);
        }
        Ok(free)
    }
}
