use ulid::Ulid;

use crate::model::ResourceRef;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input. Never reaches the locking phase.
    Validation {
        field: &'static str,
        reason: &'static str,
    },
    /// The interval overlaps a committed booking on `resource`. The first
    /// conflict in lock order is reported; recoverable by picking another slot.
    Conflict {
        resource: ResourceRef,
        conflicting: Ulid,
    },
    /// Unknown booking id on cancel. Cancel is deliberately not idempotent.
    NotFound(Ulid),
    /// A resource lock could not be acquired within the engine's timeout.
    /// Retry policy belongs to the caller.
    Busy(ResourceRef),
    LimitExceeded(&'static str),
    WalError(String),
    /// Invariant violation — a bug signal, never a normal outcome.
    Internal(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::Conflict {
                resource,
                conflicting,
            } => write!(f, "conflict on {resource} with booking {conflicting}"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Busy(resource) => write!(f, "resource busy: {resource}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
