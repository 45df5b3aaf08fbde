use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_RESOURCE;
use crate::model::*;
use crate::observability;

use super::conflict::validate_candidate;
use super::{Engine, EngineError};

impl Engine {
    /// Admit a booking: validate, lock every referenced ledger in canonical
    /// order, check all of them, and commit atomically. No
    /// partially-committed state is ever observable — all fallible work
    /// (validation, conflict checks, the WAL append) happens before the
    /// first in-memory mutation, and the locks are held across all of it.
    pub async fn propose(&self, candidate: BookingCandidate) -> Result<Booking, EngineError> {
        metrics::counter!(observability::PROPOSALS_TOTAL).increment(1);
        validate_candidate(&candidate)?;

        // Canonical lock order; validated distinct above.
        let mut resources = candidate.resources;
        resources.sort();

        let mut guards = self.lock_ledgers(&resources).await?;

        for (resource, guard) in &guards {
            if guard.len() >= MAX_BOOKINGS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many bookings on resource"));
            }
            if let Some(entry) = guard.first_overlap(&candidate.span) {
                metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                debug!(
                    resource = %resource,
                    conflicting = %entry.booking_id,
                    "proposal rejected: interval conflict"
                );
                return Err(EngineError::Conflict {
                    resource: *resource,
                    conflicting: entry.booking_id,
                });
            }
        }

        let booking = Booking {
            id: Ulid::new(),
            kind: candidate.kind,
            title: candidate.title,
            span: candidate.span,
            resources,
        };
        let event = Event::BookingCommitted {
            booking: booking.clone(),
        };
        // Compaction must not snapshot the store between this append and
        // the store write below (see `Engine::commit_gate`).
        let _commit = self.commit_gate.read().await;
        self.wal_append(&event).await?;

        for (_, guard) in guards.iter_mut() {
            guard.insert(LedgerEntry {
                booking_id: booking.id,
                span: booking.span,
            });
        }
        self.store.put(booking.clone());
        for resource in &booking.resources {
            self.notify.send(*resource, &event);
        }

        metrics::counter!(observability::COMMITS_TOTAL).increment(1);
        info!(booking = %booking.id, "booking committed");
        Ok(booking)
    }

    /// Cancel a committed booking: remove it from every ledger it touches
    /// and from the store in one atomic step, under the same lock order as
    /// admission. Cancelling an unknown (or already-cancelled) id is an
    /// explicit `NotFound`, not a silent success.
    pub async fn cancel(&self, id: Ulid) -> Result<(), EngineError> {
        let booking = self.store.get(&id).ok_or(EngineError::NotFound(id))?;

        // Committed bookings hold their resources pre-sorted.
        let resources = booking.resources;
        let mut guards = self.lock_ledgers(&resources).await?;

        // Re-check under the locks — a concurrent cancel may have won.
        if self.store.get(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        // A committed booking missing from one of its ledgers means the
        // ledger invariant is broken; refuse to mutate anything.
        if guards.iter().any(|(_, guard)| !guard.contains(id)) {
            return Err(EngineError::Internal("ledger missing committed booking"));
        }

        let event = Event::BookingCancelled { id };
        // Same snapshot exclusion as in `propose`.
        let _commit = self.commit_gate.read().await;
        self.wal_append(&event).await?;

        for (_, guard) in guards.iter_mut() {
            guard.remove(id);
        }
        self.store.delete(&id);
        for resource in &resources {
            self.notify.send(*resource, &event);
        }

        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        info!(booking = %id, "booking cancelled");
        Ok(())
    }
}
