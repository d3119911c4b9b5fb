mod error;
mod ledger;
mod mutations;
mod queries;
mod queue;
mod slots;
mod store;
mod vehicles;

pub use error::EngineError;
pub use ledger::SessionLedger;
pub use queue::WaitQueue;
pub use slots::SlotRegistry;
pub use store::Stores;
pub use vehicles::{Lane, VehicleRegistry};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::clock::Clock;
use crate::drainer::DrainQueue;
use crate::limits::*;
use crate::model::*;
use crate::rent::Tariff;
use crate::wal::Wal;

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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Take every Append already waiting in the channel.
/// 4. One flush_sync for the whole batch, then answer every sender.
///
/// A non-append command ends the batch window; the batch is flushed before the
/// command runs, so a compaction never overtakes an acknowledged append.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes of a failed batch
    // never get written as part of the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
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
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

/// The parking lot: slot assignment, queueing and billing over one WAL.
///
/// Lock order, outermost first: `checkpoint` (read for units of work, write
/// for compaction) → `drain_gate` → a vehicle lane → the queue tail gate or
/// `slot_gate` → the stores' own short-lived mutexes. The stores' mutexes are
/// never held across an await.
pub struct Engine {
    pub(super) stores: Stores,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) tariff: Tariff,
    pub(super) drains: DrainQueue,
    pub(super) checkpoint: RwLock<()>,
    /// Serializes slot initialization so `SlotsAdded` ranges never overlap.
    pub(super) slot_gate: Mutex<()>,
    /// One drain at a time, so requeued heads keep their order.
    pub(super) drain_gate: Mutex<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        clock: Arc<dyn Clock>,
        tariff: Tariff,
        drains: DrainQueue,
    ) -> io::Result<Self> {
        let wal = Wal::open(&wal_path)?;
        let events = Wal::replay(&wal_path)?;
        let stores = Stores::from_events(&events);
        tracing::info!(
            "replayed {} events from {}: {} slots, {} open sessions, {} queued",
            events.len(),
            wal_path.display(),
            stores.slots.count_total(),
            stores.ledger.open_count(),
            stores.queue.len(),
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self::with_parts(stores, wal_tx, clock, tariff, drains);
        engine.publish_gauges();
        Ok(engine)
    }

    pub(super) fn with_parts(
        stores: Stores,
        wal_tx: mpsc::Sender<WalCommand>,
        clock: Arc<dyn Clock>,
        tariff: Tariff,
        drains: DrainQueue,
    ) -> Self {
        Self {
            stores,
            wal_tx,
            clock,
            tariff,
            drains,
            checkpoint: RwLock::new(()),
            slot_gate: Mutex::new(()),
            drain_gate: Mutex::new(()),
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append then apply. Nothing reaches memory unless it reached disk.
    pub(super) async fn persist_and_apply(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.stores.apply_event(event)
    }

    pub(super) fn publish_gauges(&self) {
        metrics::gauge!(crate::observability::SLOTS_FREE).set(self.stores.slots.count_free() as f64);
        metrics::gauge!(crate::observability::QUEUE_DEPTH).set(self.stores.queue.len() as f64);
    }
}

/// Trim and check a plate. Plates are compared exactly after trimming.
pub(super) fn validate_plate(plate: &str) -> Result<&str, EngineError> {
    let plate = plate.trim();
    if plate.is_empty() {
        return Err(EngineError::InvalidArgument("plate must not be empty".into()));
    }
    if plate.chars().count() > MAX_PLATE_LEN {
        return Err(EngineError::LimitExceeded("plate too long"));
    }
    if let Some(c) = plate
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == ' '))
    {
        return Err(EngineError::InvalidArgument(format!(
            "plate contains invalid character {c:?}"
        )));
    }
    Ok(plate)
}

pub(super) fn validate_timestamp(ts: Ms) -> Result<Ms, EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ts) {
        return Err(EngineError::InvalidArgument(format!(
            "timestamp {ts} out of range"
        )));
    }
    Ok(ts)
}
