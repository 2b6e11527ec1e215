use crate::model::*;

// ── Free-range Algorithm ──────────────────────────────────────────

/// Sub-ranges of `window` not covered by any APPROVED reservation of the room.
pub fn free_ranges(room: &RoomState, window: &DateRange) -> Vec<DateRange> {
    let mut occupied: Vec<DateRange> = room
        .overlapping(window)
        .filter(|r| r.status == ReservationStatus::Approved)
        .map(|r| {
            DateRange::new(
                r.range.start.max(window.start),
                r.range.end.min(window.end),
            )
        })
        .collect();

    if occupied.is_empty() {
        return vec![*window];
    }
    occupied.sort_by_key(|r| r.start);
    let occupied = merge_overlapping(&occupied);
    subtract_ranges(&[*window], &occupied)
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` ranges from sorted `base` ranges.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new(current_start, current_end));
        }
    }

    result
}
