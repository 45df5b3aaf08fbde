//! Hard caps on inputs the engine accepts. Exceeding one of these is a
//! `LimitExceeded` error, distinct from field-level validation failures.

use std::time::Duration;

use crate::model::Ms;

pub const MAX_TITLE_LEN: usize = 256;

pub const MAX_RESOURCES_PER_BOOKING: usize = 16;

pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 2100-01-01T00:00:00Z. Anything beyond this is a caller bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// 30 days. No single booking occupies a resource longer than this.
pub const MAX_SPAN_DURATION_MS: Ms = 30 * 24 * 3_600_000;

/// One (leap) year per list query.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// Default bound on waiting for a single resource lock before giving up
/// with `Busy`. Retry policy belongs to the caller, not the engine.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
