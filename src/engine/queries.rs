use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::Booking;

use super::{BookingFilter, Engine, EngineError};

impl Engine {
    /// List committed bookings matching `filter`, ordered by `(start, id)`.
    ///
    /// Reads a lock-free snapshot of the store: finite, restartable, and a
    /// pure function of committed state — not linearizable with in-flight
    /// commits, which is acceptable since the no-overlap invariant only
    /// covers committed bookings.
    pub fn bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        if filter.range.start >= filter.range.end {
            return Err(EngineError::Validation {
                field: "range",
                reason: "start must be before end",
            });
        }
        if filter.range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        Ok(self.store.list(filter))
    }

    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.store.get(id)
    }
}
