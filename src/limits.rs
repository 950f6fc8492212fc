use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may not be wider than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;

/// Listing and availability windows may not be wider than 366 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_BATCH_SIZE: usize = 100;
pub const MAX_BOOKINGS_PER_HALL: usize = 100_000;
pub const MAX_HALL_ID_LEN: usize = 64;
pub const MAX_HALLS: usize = 1_000;

/// Longest request line accepted by the wire protocol.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// How often update/cancel re-plan their locks when the booking moves underneath them.
pub const MAX_REPLANS: usize = 3;
