use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::{Engine, InMemoryStore};
use crate::model::LifecycleEvent;
use crate::observability::{
    HOLDS_PURGED_TOTAL, SWEEP_BOOKINGS_FAILED_TOTAL, SWEEP_DURATION_SECONDS,
    SWEEP_TRANSITIONS_TOTAL,
};

const COMPACT_CHECK_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub visited: usize,
    pub changed: usize,
    pub failed: usize,
    pub holds_purged: usize,
}

/// One reconciliation pass: a `TimeTick` for every non-terminal booking,
/// each in its own failure boundary, then expired holds are dropped.
pub async fn sweep_once(engine: &Engine) -> SweepReport {
    let started = Instant::now();
    let now = engine.now();
    let mut report = SweepReport::default();

    let bookings = match engine.stores.bookings.list_non_terminal().await {
        Ok(b) => b,
        Err(e) => {
            warn!("status sync skipped: {e}");
            return report;
        }
    };

    for booking in bookings {
        report.visited += 1;
        let event = LifecycleEvent::TimeTick {
            booking_id: booking.id,
            now,
        };
        match engine.apply(event).await {
            Ok(applied) if applied.changed => report.changed += 1,
            Ok(_) => {}
            Err(e) => {
                report.failed += 1;
                warn!(booking_id = %booking.id, "status sync failed for booking: {e}");
            }
        }
    }

    match engine.stores.holds.purge_expired(now).await {
        Ok(n) => report.holds_purged = n,
        Err(e) => warn!("hold purge failed: {e}"),
    }
    let pruned = engine.prune_locks();

    metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    metrics::counter!(SWEEP_TRANSITIONS_TOTAL).increment(report.changed as u64);
    metrics::counter!(SWEEP_BOOKINGS_FAILED_TOTAL).increment(report.failed as u64);
    metrics::counter!(HOLDS_PURGED_TOTAL).increment(report.holds_purged as u64);

    if report.changed > 0 || report.failed > 0 {
        info!(
            visited = report.visited,
            changed = report.changed,
            failed = report.failed,
            holds_purged = report.holds_purged,
            "status sync"
        );
    } else {
        debug!(visited = report.visited, holds_purged = report.holds_purged, pruned, "status sync");
    }
    report
}

/// Background task running [`sweep_once`] on a fixed interval. The first
/// pass runs immediately.
pub async fn run_status_sync(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// Background task that rewrites the journal once it grows past `threshold`.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(COMPACT_CHECK_SECS));
    loop {
        interval.tick().await;
        if let Err(e) = store.compact_if_needed(threshold).await {
            warn!("journal compaction failed: {e}");
        }
    }
}
