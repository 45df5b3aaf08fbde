//! cadenza — a booking admission engine for shared time-bound resources.
//!
//! A small organization (the motivating deployment is a piano school) books
//! rooms, teachers, and students into half-open time slots. The engine
//! decides whether a proposed booking may be committed and guarantees that
//! no two committed bookings ever share a resource and an overlapping
//! interval, even under concurrent proposals.
//!
//! Committed state is durable: every commit and cancellation is appended to
//! a write-ahead log before it becomes visible, and the engine rebuilds its
//! per-resource ledgers by replaying the log on startup.

pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use engine::{BookingFilter, ConflictReport, Engine, EngineError};
pub use model::{Booking, BookingCandidate, BookingKind, Ms, ResourceKind, ResourceRef, Span};
