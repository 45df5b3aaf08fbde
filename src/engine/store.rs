use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Filter for booking list queries. The time window is required (half-open
/// overlap, matching admission semantics); resource and kind narrow further.
#[derive(Debug, Clone)]
pub struct BookingFilter {
    pub range: Span,
    pub resource: Option<ResourceRef>,
    pub kind: Option<BookingKind>,
}

impl BookingFilter {
    pub fn range(start: Ms, end: Ms) -> Self {
        Self {
            range: Span { start, end },
            resource: None,
            kind: None,
        }
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_kind(mut self, kind: BookingKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn matches(&self, booking: &Booking) -> bool {
        if !self.range.overlaps(&booking.span) {
            return false;
        }
        if let Some(resource) = &self.resource
            && !booking.resources.contains(resource)
        {
            return false;
        }
        if let Some(kind) = &self.kind
            && booking.kind != *kind
        {
            return false;
        }
        true
    }
}

/// Canonical record of committed bookings, keyed by id. Lock-free snapshot
/// reads; mutation happens only inside the engine's admission critical
/// sections, alongside the ledger updates.
pub struct BookingStore {
    bookings: DashMap<Ulid, Booking>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn put(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn delete(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.remove(id).map(|(_, b)| b)
    }

    /// Every committed booking, unordered.
    pub fn all(&self) -> Vec<Booking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    /// Snapshot the bookings matching `filter`, ordered by `(start, id)`.
    pub fn list(&self, filter: &BookingFilter) -> Vec<Booking> {
        let mut matched: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matched.sort_by(|a, b| a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id)));
        matched
    }
}
