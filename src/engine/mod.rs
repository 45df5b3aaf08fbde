mod admission;
mod conflict;
mod error;
mod queries;
mod store;

pub use conflict::{ConflictReport, ConflictingBooking, describe_conflict};
pub use error::EngineError;
pub use store::{BookingFilter, BookingStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::limits::DEFAULT_LOCK_TIMEOUT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<ResourceLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block until an Append arrives, drain everything immediately available,
/// then a single flush + fsync for the whole batch before responding.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Commit the batch before handling the non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }
                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    // A failed append or flush poisons the log (a torn entry may sit at the
    // tail), so every later batch fails too until compaction rewrites it —
    // replay stops at the first bad entry, and an acked commit must never
    // land beyond that point.
    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = wal.flush_sync();
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The admission engine: one process-wide instance owning every resource
/// ledger and the canonical booking store.
///
/// All mutation goes through `propose`/`cancel`, which lock the referenced
/// resources' ledgers exclusively, in canonical `(kind, id)` order, for the
/// whole check-and-mutate section. Reads are lock-free snapshots.
pub struct Engine {
    pub(super) ledgers: DashMap<ResourceRef, SharedLedger>,
    pub(super) store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Read side held from the WAL append to the last store/ledger write of
    /// a commit; write side held while compaction snapshots the store and
    /// swaps the log. An acknowledged commit is therefore either in the
    /// snapshot or appended after the swap, never stranded in the old file.
    pub(super) commit_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
    lock_timeout: Duration,
}

impl Engine {
    /// Open the WAL at `wal_path`, replay committed history, and start the
    /// group-commit writer. Starts empty when the log doesn't exist yet.
    ///
    /// Must be called from within a tokio runtime — the writer task is
    /// spawned onto the ambient runtime, and the call panics without one.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_lock_timeout(wal_path, notify, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        lock_timeout: Duration,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledgers: DashMap::new(),
            store: BookingStore::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            notify,
            lock_timeout,
        };
        for event in &events {
            engine.apply_replayed(event);
        }
        Ok(engine)
    }

    /// Rebuild in-memory state from one replayed event. We are the sole
    /// owner of every ledger Arc here, so try_write always succeeds.
    fn apply_replayed(&self, event: &Event) {
        match event {
            Event::BookingCommitted { booking } => {
                for resource in &booking.resources {
                    let ledger = self.ledger(*resource);
                    let mut guard = ledger.try_write().expect("replay: uncontended write");
                    guard.insert(LedgerEntry {
                        booking_id: booking.id,
                        span: booking.span,
                    });
                }
                self.store.put(booking.clone());
            }
            Event::BookingCancelled { id } => match self.store.delete(id) {
                Some(booking) => {
                    for resource in &booking.resources {
                        let ledger = self.ledger(*resource);
                        let mut guard = ledger.try_write().expect("replay: uncontended write");
                        guard.remove(*id);
                    }
                }
                None => tracing::warn!("replay: cancellation of unknown booking {id}"),
            },
        }
    }

    /// The ledger for `resource`, created empty on first reference.
    pub(crate) fn ledger(&self, resource: ResourceRef) -> SharedLedger {
        self.ledgers
            .entry(resource)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceLedger::new(resource))))
            .value()
            .clone()
    }

    /// Acquire write locks for `resources`, which must already be sorted in
    /// canonical order — that total order is the deadlock-avoidance
    /// mechanism. Each acquisition is bounded by the engine's lock timeout;
    /// on expiry every guard taken so far is released by drop.
    pub(super) async fn lock_ledgers(
        &self,
        resources: &[ResourceRef],
    ) -> Result<Vec<(ResourceRef, OwnedRwLockWriteGuard<ResourceLedger>)>, EngineError> {
        debug_assert!(
            resources.windows(2).all(|w| w[0] < w[1]),
            "resources must be sorted and distinct before locking"
        );
        let mut guards = Vec::with_capacity(resources.len());
        for resource in resources {
            let ledger = self.ledger(*resource);
            match tokio::time::timeout(self.lock_timeout, ledger.write_owned()).await {
                Ok(guard) => guards.push((*resource, guard)),
                Err(_) => {
                    metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                    return Err(EngineError::Busy(*resource));
                }
            }
        }
        Ok(guards)
    }

    /// Write an event through the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn store(&self) -> &BookingStore {
        &self.store
    }

    /// Translate a conflict into its user-facing description.
    pub fn explain_conflict(
        &self,
        resource: ResourceRef,
        conflicting: ulid::Ulid,
    ) -> Option<ConflictReport> {
        describe_conflict(&self.store, resource, conflicting)
    }

    /// Rewrite the WAL as one `BookingCommitted` per live booking.
    ///
    /// The commit gate is held exclusively from the store snapshot through
    /// the log swap; in-flight commits finish applying before the snapshot
    /// is taken, and new ones append only to the swapped-in log.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _paused = self.commit_gate.write().await;

        let mut bookings = self.store.all();
        bookings.sort_by_key(|b| b.id);
        let events: Vec<Event> = bookings
            .into_iter()
            .map(|booking| Event::BookingCommitted { booking })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
