//! Hard caps and defaults applied at the engine boundary.

/// Page size used when a search does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// First page.
pub const DEFAULT_PAGE_NUMBER: usize = 0;

pub const MAX_PAGE_SIZE: usize = 100;

/// Reservations of any status kept per room.
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Widest window an availability query may scan (roughly three years).
pub const MAX_QUERY_WINDOW_DAYS: i64 = 1_100;

/// Largest WAL payload replay will read. A bigger length prefix can only come
/// from a corrupt tail.
pub const MAX_WAL_ENTRY_BYTES: usize = 64 * 1024;
