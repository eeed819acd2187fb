use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::{SWEEP_LARGE_BATCH, SWEEP_SLOW_MS};
use crate::observability::{SWEEP_BATCH_SIZE, SWEEP_DURATION_SECONDS, SWEEP_FAILURES_TOTAL};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue holds found at the start of the run.
    pub overdue: usize,
    pub expired: usize,
    pub capacity_restored: u64,
    /// Holds that left ACTIVE or were extended before the sweep reached them.
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Expire every overdue hold once. Each hold is handled on its own; a failure
/// is logged and counted, never fatal to the batch.
pub async fn sweep_once(engine: &Engine) -> SweepReport {
    let started = Instant::now();
    let overdue = engine.collect_expired_holds(engine.now());
    let mut report = SweepReport {
        overdue: overdue.len(),
        ..SweepReport::default()
    };

    for hold_id in overdue {
        match engine.expire_hold(hold_id).await {
            Ok(Some(quantity)) => {
                report.expired += 1;
                report.capacity_restored += u64::from(quantity);
            }
            Ok(None) => report.skipped += 1,
            Err(e @ (EngineError::InvalidState { .. } | EngineError::NotFound { .. })) => {
                // Confirmed, released or swept by someone else first.
                debug!("sweeper skip {hold_id}: {e}");
                report.skipped += 1;
            }
            Err(e) => {
                warn!("sweeper failed to expire hold {hold_id}: {e}");
                metrics::counter!(SWEEP_FAILURES_TOTAL).increment(1);
                report.failed += 1;
            }
        }
    }
    report.elapsed = started.elapsed();

    metrics::histogram!(SWEEP_BATCH_SIZE).record(report.overdue as f64);
    metrics::histogram!(SWEEP_DURATION_SECONDS).record(report.elapsed.as_secs_f64());
    if report.overdue > 0 {
        info!(
            "sweep expired {} hold(s), restored {} unit(s) ({} skipped, {} failed) in {}ms",
            report.expired,
            report.capacity_restored,
            report.skipped,
            report.failed,
            report.elapsed.as_millis()
        );
    }
    if report.overdue > SWEEP_LARGE_BATCH {
        warn!(
            "sweep found {} overdue holds; checkout may be abandoning holds upstream",
            report.overdue
        );
    }
    if report.elapsed.as_millis() > SWEEP_SLOW_MS {
        warn!("sweep took {}ms", report.elapsed.as_millis());
    }
    report
}

/// Background task that runs `sweep_once` on a fixed interval.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction after {appends} appends failed: {e}");
        }
    }
}
