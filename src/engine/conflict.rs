use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::store::BookingStore;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation {
            field: "interval",
            reason: "start must be before end",
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(())
}

/// Field-level validation of a proposal. Pure: runs before any lock is
/// taken and has no side effects on failure.
pub(crate) fn validate_candidate(candidate: &BookingCandidate) -> Result<(), EngineError> {
    validate_span(&candidate.span)?;

    if candidate.title.is_empty() {
        return Err(EngineError::Validation {
            field: "title",
            reason: "title is required",
        });
    }
    if candidate.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }

    if candidate.resources.is_empty() {
        return Err(EngineError::Validation {
            field: "resources",
            reason: "at least one resource is required",
        });
    }
    if candidate.resources.len() > MAX_RESOURCES_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many resources"));
    }
    let mut sorted = candidate.resources.clone();
    sorted.sort();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(EngineError::Validation {
            field: "resources",
            reason: "duplicate resource reference",
        });
    }

    let has_kind = |kind| candidate.resources.iter().any(|r| r.kind == kind);
    match candidate.kind {
        BookingKind::Reservation => {
            if !has_kind(ResourceKind::Room) {
                return Err(EngineError::Validation {
                    field: "resources",
                    reason: "a reservation requires a room",
                });
            }
            if !has_kind(ResourceKind::Student) {
                return Err(EngineError::Validation {
                    field: "resources",
                    reason: "a reservation requires a student",
                });
            }
        }
        BookingKind::Lesson => {
            if !has_kind(ResourceKind::Teacher) {
                return Err(EngineError::Validation {
                    field: "resources",
                    reason: "a lesson requires a teacher",
                });
            }
            if !has_kind(ResourceKind::Student) {
                return Err(EngineError::Validation {
                    field: "resources",
                    reason: "a lesson requires a student",
                });
            }
        }
    }
    Ok(())
}

/// User-facing description of a rejected proposal: which resource clashed
/// and with which existing booking. Serialized as-is by the transport layer
/// in its 409 responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub resource_kind: ResourceKind,
    pub resource_id: Ulid,
    pub conflicting: ConflictingBooking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictingBooking {
    pub id: Ulid,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
}

/// Pure translation of a `Conflict` error. Returns None if the conflicting
/// booking was cancelled between rejection and lookup.
pub fn describe_conflict(
    store: &BookingStore,
    resource: ResourceRef,
    conflicting: Ulid,
) -> Option<ConflictReport> {
    let booking = store.get(&conflicting)?;
    Some(ConflictReport {
        resource_kind: resource.kind,
        resource_id: resource.id,
        conflicting: ConflictingBooking {
            id: booking.id,
            title: booking.title,
            start: booking.span.start,
            end: booking.span.end,
        },
    })
}
