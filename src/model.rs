use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type. Inputs are assumed to be
/// normalized to a single reference timezone before they reach the engine.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Half-open overlap: spans that merely touch (`a.end == b.start`) do
    /// not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The three dimensions a booking can occupy. The derived order (rooms
/// before teachers before students, then by id) is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Room,
    Teacher,
    Student,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Room => write!(f, "room"),
            ResourceKind::Teacher => write!(f, "teacher"),
            ResourceKind::Student => write!(f, "student"),
        }
    }
}

/// Opaque reference to one schedulable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Ulid,
}

impl ResourceRef {
    pub fn room(id: Ulid) -> Self {
        Self { kind: ResourceKind::Room, id }
    }

    pub fn teacher(id: Ulid) -> Self {
        Self { kind: ResourceKind::Teacher, id }
    }

    pub fn student(id: Ulid) -> Self {
        Self { kind: ResourceKind::Student, id }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    /// A student practicing alone in a room.
    Reservation,
    /// A taught lesson: teacher + student, optionally in a room.
    Lesson,
}

/// A committed booking. Identity, interval, and resources are immutable
/// after commit — amendments are modeled as cancel + re-propose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub kind: BookingKind,
    pub title: String,
    pub span: Span,
    /// Distinct, held in canonical `(kind, id)` order once committed.
    pub resources: Vec<ResourceRef>,
}

/// What a caller submits to `Engine::propose`. The id is generated by the
/// engine only after admission succeeds.
#[derive(Debug, Clone)]
pub struct BookingCandidate {
    pub kind: BookingKind,
    pub title: String,
    pub span: Span,
    pub resources: Vec<ResourceRef>,
}

impl BookingCandidate {
    pub fn reservation(title: impl Into<String>, span: Span, room: Ulid, student: Ulid) -> Self {
        Self {
            kind: BookingKind::Reservation,
            title: title.into(),
            span,
            resources: vec![ResourceRef::room(room), ResourceRef::student(student)],
        }
    }

    pub fn lesson(
        title: impl Into<String>,
        span: Span,
        teacher: Ulid,
        student: Ulid,
        room: Option<Ulid>,
    ) -> Self {
        let mut resources = vec![ResourceRef::teacher(teacher), ResourceRef::student(student)];
        if let Some(room) = room {
            resources.push(ResourceRef::room(room));
        }
        Self {
            kind: BookingKind::Lesson,
            title: title.into(),
            span,
            resources,
        }
    }
}

/// One committed interval on a resource's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub booking_id: Ulid,
    pub span: Span,
}

/// Per-resource ordered index of committed intervals.
///
/// Entries are kept sorted by `span.start`. Because committed entries never
/// overlap, their end times are sorted as well, which makes the overlap
/// probe a binary search on `span.end` plus a short forward scan.
#[derive(Debug)]
pub struct ResourceLedger {
    pub resource: ResourceRef,
    entries: Vec<LedgerEntry>,
}

impl ResourceLedger {
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn contains(&self, booking_id: Ulid) -> bool {
        self.entries.iter().any(|e| e.booking_id == booking_id)
    }

    /// First committed entry overlapping `span`, or None. Read-only.
    ///
    /// Everything before the partition point ends at or before `span.start`
    /// and cannot overlap; the scan stops at the first entry starting at or
    /// after `span.end`.
    pub fn first_overlap(&self, span: &Span) -> Option<&LedgerEntry> {
        let from = self.entries.partition_point(|e| e.span.end <= span.start);
        self.entries[from..]
            .iter()
            .take_while(|e| e.span.start < span.end)
            .find(|e| e.span.overlaps(span))
    }

    /// Ordered insert. The caller has already verified no overlap inside
    /// the admission critical section; debug builds re-assert the invariant.
    pub fn insert(&mut self, entry: LedgerEntry) {
        debug_assert!(
            self.first_overlap(&entry.span).is_none(),
            "ledger {}: inserting overlapping entry for booking {}",
            self.resource,
            entry.booking_id
        );
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Remove the entry for `booking_id`, returning it if present.
    pub fn remove(&mut self, booking_id: Ulid) -> Option<LedgerEntry> {
        let pos = self.entries.iter().position(|e| e.booking_id == booking_id)?;
        Some(self.entries.remove(pos))
    }
}

/// The WAL record format, doubling as the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCommitted { booking: Booking },
    BookingCancelled { id: Ulid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn resource_ref_lock_order() {
        let id = Ulid::new();
        let room = ResourceRef::room(id);
        let teacher = ResourceRef::teacher(id);
        let student = ResourceRef::student(id);
        assert!(room < teacher);
        assert!(teacher < student);

        // Within a kind, order follows the id.
        let mut ids = [Ulid::new(), Ulid::new(), Ulid::new()];
        ids.sort();
        assert!(ResourceRef::room(ids[0]) < ResourceRef::room(ids[1]));
        assert!(ResourceRef::room(ids[1]) < ResourceRef::room(ids[2]));
    }

    fn entry(start: Ms, end: Ms) -> LedgerEntry {
        LedgerEntry {
            booking_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn ledger_insert_keeps_start_order() {
        let mut ledger = ResourceLedger::new(ResourceRef::room(Ulid::new()));
        ledger.insert(entry(300, 400));
        ledger.insert(entry(100, 200));
        ledger.insert(entry(200, 300));
        let starts: Vec<Ms> = ledger.entries().iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn ledger_first_overlap_hits_and_misses() {
        let mut ledger = ResourceLedger::new(ResourceRef::room(Ulid::new()));
        let a = entry(100, 200);
        let b = entry(450, 600);
        let c = entry(1000, 1100);
        ledger.insert(a);
        ledger.insert(b);
        ledger.insert(c);

        let hit = ledger.first_overlap(&Span::new(500, 800)).unwrap();
        assert_eq!(hit.booking_id, b.booking_id);

        assert!(ledger.first_overlap(&Span::new(200, 450)).is_none()); // gap, touching both sides
        assert!(ledger.first_overlap(&Span::new(1100, 2000)).is_none()); // all past
        assert!(ledger.first_overlap(&Span::new(0, 100)).is_none()); // all future
    }

    #[test]
    fn ledger_first_overlap_spanning_entry() {
        let mut ledger = ResourceLedger::new(ResourceRef::teacher(Ulid::new()));
        let wide = entry(0, 10_000);
        ledger.insert(wide);
        let hit = ledger.first_overlap(&Span::new(500, 600)).unwrap();
        assert_eq!(hit.booking_id, wide.booking_id);
    }

    #[test]
    fn ledger_first_overlap_one_ms() {
        let mut ledger = ResourceLedger::new(ResourceRef::room(Ulid::new()));
        ledger.insert(entry(100, 201));
        assert!(ledger.first_overlap(&Span::new(200, 300)).is_some());
        assert!(ledger.first_overlap(&Span::new(201, 300)).is_none());
    }

    #[test]
    fn ledger_remove() {
        let mut ledger = ResourceLedger::new(ResourceRef::room(Ulid::new()));
        let a = entry(0, 100);
        let b = entry(100, 200);
        let c = entry(200, 300);
        ledger.insert(a);
        ledger.insert(b);
        ledger.insert(c);

        let removed = ledger.remove(b.booking_id).unwrap();
        assert_eq!(removed.span, b.span);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.remove(Ulid::new()).is_none());
        let starts: Vec<Ms> = ledger.entries().iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![0, 200]);
    }

    #[test]
    fn candidate_helpers_carry_required_kinds() {
        let span = Span::new(0, 100);
        let r = BookingCandidate::reservation("Practice", span, Ulid::new(), Ulid::new());
        assert_eq!(r.kind, BookingKind::Reservation);
        assert!(r.resources.iter().any(|x| x.kind == ResourceKind::Room));
        assert!(r.resources.iter().any(|x| x.kind == ResourceKind::Student));

        let l = BookingCandidate::lesson("Scales", span, Ulid::new(), Ulid::new(), None);
        assert_eq!(l.resources.len(), 2);
        let l2 = BookingCandidate::lesson("Scales", span, Ulid::new(), Ulid::new(), Some(Ulid::new()));
        assert_eq!(l2.resources.len(), 3);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCommitted {
            booking: Booking {
                id: Ulid::new(),
                kind: BookingKind::Lesson,
                title: "Chopin étude".into(),
                span: Span::new(1000, 2000),
                resources: vec![ResourceRef::teacher(Ulid::new()), ResourceRef::student(Ulid::new())],
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
