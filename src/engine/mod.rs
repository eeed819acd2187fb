mod catalog;
mod error;
mod holds;
mod ledger;
mod queries;
mod saga;
mod snapshot;

pub use catalog::{NewBlackout, NewResource, ResourceFilter, ResourcePatch};
pub use error::{BlackedOutDate, EngineError, Shortfall};
pub use holds::{CreateHold, HoldOutcome};
pub use queries::{CapacitySummary, HealthReport, HealthStatus, HoldCounts, Page, SweeperHealth};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::wal::Wal;

use snapshot::Snapshot;

pub type SharedCapacity = Arc<RwLock<CapacityRecord>>;
pub type SharedHold = Arc<RwLock<Hold>>;

/// Hold ids created under one client token, first date first. `None` until the
/// first request for the token commits.
type TokenSlot = Arc<Mutex<Option<Vec<Ulid>>>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
/// A non-append command ends the batch; it is handled after the flush.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so half-buffered bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
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
        WalCommand::Append { .. } => {}
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Lifetime of a new hold.
    pub hold_ttl_ms: Ms,
    /// Forward window initialized when a resource is onboarded with capacity.
    pub capacity_window_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hold_ttl_ms: 30 * MINUTE_MS,
            capacity_window_days: 90,
        }
    }
}

pub struct Engine {
    pub(super) resources: DashMap<Ulid, Resource>,
    pub(super) ledger: DashMap<(Ulid, Day), SharedCapacity>,
    pub(super) blackouts: DashMap<Ulid, Blackout>,
    pub(super) holds: DashMap<Ulid, SharedHold>,
    pub(super) allocations: DashMap<Ulid, Allocation>,
    pub(super) tokens: DashMap<String, TokenSlot>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Read-held by every committing operation, write-held by compaction,
    /// so a snapshot never races an append. Always acquired before any other lock.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes catalog read-modify-write.
    pub(super) catalog_lock: Mutex<()>,
    /// Serializes ledger row creation so the WAL order of `CapacityInitialized`
    /// matches which row the in-memory ledger keeps.
    pub(super) ledger_init_lock: Mutex<()>,
    pub(super) settings: EngineSettings,
    clock: Arc<dyn Clock>,
    #[cfg(test)]
    pub(super) failpoints: std::sync::Mutex<HashMap<&'static str, usize>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        Self::with_clock(wal_path, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let replayed = events.len();
        let snapshot = Snapshot::from_events(&events);
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            ledger: DashMap::new(),
            blackouts: DashMap::new(),
            holds: DashMap::new(),
            allocations: DashMap::new(),
            tokens: DashMap::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
            ledger_init_lock: Mutex::new(()),
            settings,
            clock,
            #[cfg(test)]
            failpoints: std::sync::Mutex::new(HashMap::new()),
        };
        engine.load(snapshot);
        if replayed > 0 {
            tracing::info!(
                "replayed {replayed} WAL events: {} resources, {} ledger rows, {} holds, {} allocations",
                engine.resources.len(),
                engine.ledger.len(),
                engine.holds.len(),
                engine.allocations.len()
            );
        }
        Ok(engine)
    }

    /// Populate the indexes from replayed state and rebuild the idempotency index.
    fn load(&self, snapshot: Snapshot) {
        let Snapshot {
            resources,
            ledger,
            blackouts,
            holds,
            allocations,
        } = snapshot;

        for (id, resource) in resources {
            self.resources.insert(id, resource);
        }
        for (key, record) in ledger {
            self.ledger.insert(key, Arc::new(RwLock::new(record)));
        }
        for (id, blackout) in blackouts {
            self.blackouts.insert(id, blackout);
        }
        for (id, allocation) in allocations {
            self.allocations.insert(id, allocation);
        }

        let mut by_token: HashMap<String, Vec<(Day, Ulid)>> = HashMap::new();
        for (id, hold) in holds {
            by_token
                .entry(hold.request_token().to_string())
                .or_default()
                .push((hold.date, id));
            self.holds.insert(id, Arc::new(RwLock::new(hold)));
        }
        for (token, mut siblings) in by_token {
            siblings.sort();
            let ids = siblings.into_iter().map(|(_, id)| id).collect();
            self.tokens.insert(token, Arc::new(Mutex::new(Some(ids))));
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn today(&self) -> Day {
        self.clock.today()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub(super) fn hold_handle(&self, id: Ulid) -> Result<SharedHold, EngineError> {
        self.holds
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found("hold", id))
    }

    /// Resource that is present and not soft-deleted.
    pub(super) fn live_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        self.resources
            .get(&id)
            .map(|e| e.value().clone())
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| EngineError::not_found("resource", id))
    }

    /// Consistent image of the whole state. Caller holds the commit gate exclusively.
    async fn capture(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for entry in self.resources.iter() {
            snapshot.resources.insert(*entry.key(), entry.value().clone());
        }
        for entry in self.blackouts.iter() {
            snapshot.blackouts.insert(*entry.key(), entry.value().clone());
        }
        for entry in self.allocations.iter() {
            snapshot.allocations.insert(*entry.key(), entry.value().clone());
        }

        let rows: Vec<_> = self
            .ledger
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (key, row) in rows {
            snapshot.ledger.insert(key, row.read().await.clone());
        }
        let holds: Vec<_> = self
            .holds
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (id, hold) in holds {
            snapshot.holds.insert(id, hold.read().await.clone());
        }
        snapshot
    }

    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.capture().await.into_events();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
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

    /// Arm a failpoint: the named step succeeds `after` more times, then fails once.
    #[cfg(test)]
    pub(super) fn arm_failpoint(&self, name: &'static str, after: usize) {
        self.failpoints.lock().unwrap().insert(name, after);
    }

    #[cfg(test)]
    pub(super) fn failpoint(&self, name: &'static str) -> Result<(), EngineError> {
        let mut points = self.failpoints.lock().unwrap();
        match points.get_mut(name) {
            Some(0) => {
                points.remove(name);
                Err(EngineError::Wal(format!("failpoint {name}")))
            }
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    #[inline(always)]
    pub(super) fn failpoint(&self, _name: &'static str) -> Result<(), EngineError> {
        Ok(())
    }
}
