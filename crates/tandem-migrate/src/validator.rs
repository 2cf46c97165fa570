//! Consistency validation
//!
//! A validator run drives two concurrent scans between a base store (the
//! current source of truth) and a target store:
//!
//! - the **forward scan** walks the base in id order and checks each row
//!   against the target, flagging rows the target lacks (`TargetMissing`)
//!   and rows whose values differ (`NotEqual`);
//! - the **reverse scan** pages ids out of the target and flags rows the
//!   base no longer has (`BaseMissing`), which repair turns into deletes.
//!
//! Divergences are published as [`InconsistencyEvent`]s; nothing is repaired
//! inline. Scan errors and timeouts skip past the affected row and keep
//! going: a pass is best-effort and a later pass re-detects whatever a skip
//! left behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{error::Elapsed, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_store::record::RecordStore;

use crate::entity::Entity;
use crate::events::{Direction, EventProducer, InconsistencyEvent, InconsistencyKind};

/// What a run does when it reaches the end of the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// One pass over everything, then stop
    Full,
    /// Only rows updated at or after the watermark, re-polled until
    /// cancelled
    Incremental {
        /// Watermark in epoch millis, compared against `utime`
        watermark_ms: i64,
    },
}

/// Counters for one scan direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Rows compared
    pub rows_scanned: u64,
    /// Inconsistency events published
    pub events_emitted: u64,
    /// Rows or pages skipped due to errors or timeouts
    pub errors_skipped: u64,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The run finished its pass
    Completed,
    /// The run was cancelled
    Cancelled,
}

/// Final accounting for one validation run
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    /// Forward (base to target) scan counters
    pub forward: ScanStats,
    /// Reverse (target to base) scan counters
    pub reverse: ScanStats,
    /// How the run ended
    pub state: RunState,
}

impl RunReport {
    /// Total rows compared across both directions
    pub fn rows_scanned(&self) -> u64 {
        self.forward.rows_scanned + self.reverse.rows_scanned
    }

    /// Total events published across both directions
    pub fn events_emitted(&self) -> u64 {
        self.forward.events_emitted + self.reverse.events_emitted
    }
}

/// Compares a base store against a target store and publishes divergences
pub struct Validator<R: Entity> {
    base: Arc<dyn RecordStore<R>>,
    target: Arc<dyn RecordStore<R>>,
    direction: Direction,
    producer: Arc<dyn EventProducer>,
    mode: ScanMode,
    sleep_interval: Duration,
    batch_size: usize,
    scan_timeout: Duration,
}

impl<R: Entity> Validator<R> {
    /// Create a full-scan validator with default tuning
    ///
    /// `direction` tags emitted events with which store was the base, so the
    /// fix consumer repairs the right side.
    pub fn new(
        base: Arc<dyn RecordStore<R>>,
        target: Arc<dyn RecordStore<R>>,
        direction: Direction,
        producer: Arc<dyn EventProducer>,
    ) -> Self {
        Self {
            base,
            target,
            direction,
            producer,
            mode: ScanMode::Full,
            sleep_interval: Duration::from_secs(1),
            batch_size: 100,
            scan_timeout: Duration::from_secs(1),
        }
    }

    /// One pass over everything, then stop
    pub fn full(mut self) -> Self {
        self.mode = ScanMode::Full;
        self
    }

    /// Compare only rows with `utime >= watermark_ms`, re-polling until
    /// cancelled
    pub fn incremental(mut self, watermark_ms: i64) -> Self {
        self.mode = ScanMode::Incremental { watermark_ms };
        self
    }

    /// How long an incremental scan sleeps once it catches up
    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Ids per reverse-scan page (minimum 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Deadline for each store call
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Run both scans to completion or cancellation
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        info!(direction = ?self.direction, mode = ?self.mode, "validation run starting");

        let (forward, reverse) =
            tokio::join!(self.scan_forward(&cancel), self.scan_reverse(&cancel));

        let state = if cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        let report = RunReport {
            forward,
            reverse,
            state,
        };
        info!(?report, "validation run finished");
        report
    }

    /// Walk the base in id order and compare each row against the target
    async fn scan_forward(&self, cancel: &CancellationToken) -> ScanStats {
        let mut stats = ScanStats::default();
        let mut offset: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let fetched = match self.mode {
                ScanMode::Full => self.bounded(self.base.fetch_at(offset)).await,
                ScanMode::Incremental { watermark_ms } => {
                    self.bounded(self.base.fetch_updated_at(watermark_ms, offset))
                        .await
                }
            };

            let row = match fetched {
                Ok(Ok(row)) => row,
                Ok(Err(e)) => {
                    warn!(error = %e, offset, "base fetch failed; skipping row");
                    stats.errors_skipped += 1;
                    offset += 1;
                    continue;
                }
                Err(_) => {
                    warn!(offset, "base fetch timed out; skipping row");
                    stats.errors_skipped += 1;
                    offset += 1;
                    continue;
                }
            };

            let Some(row) = row else {
                match self.mode {
                    ScanMode::Full => break,
                    // Caught up: sleep, then re-read the same offset. Rows
                    // updated past the watermark after this point extend the
                    // filtered sequence and land at or beyond it.
                    ScanMode::Incremental { .. } => {
                        if self.sleep_cancelled(cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            };

            stats.rows_scanned += 1;
            match self.bounded(self.target.find(row.id())).await {
                Ok(Ok(Some(other))) => {
                    if other != row {
                        self.notify(row.id(), InconsistencyKind::NotEqual, &mut stats)
                            .await;
                    }
                }
                Ok(Ok(None)) => {
                    self.notify(row.id(), InconsistencyKind::TargetMissing, &mut stats)
                        .await;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, id = row.id(), "target lookup failed; skipping row");
                    stats.errors_skipped += 1;
                }
                Err(_) => {
                    warn!(id = row.id(), "target lookup timed out; skipping row");
                    stats.errors_skipped += 1;
                }
            }
            offset += 1;
        }

        debug!(?stats, "forward scan ended");
        stats
    }

    /// Page ids out of the target and flag the ones the base lacks
    async fn scan_reverse(&self, cancel: &CancellationToken) -> ScanStats {
        let mut stats = ScanStats::default();
        let mut offset: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let ids = match self.bounded(self.target.ids_page(offset, self.batch_size)).await {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => {
                    warn!(error = %e, offset, "target id page failed; skipping page");
                    stats.errors_skipped += 1;
                    offset += self.batch_size as u64;
                    continue;
                }
                Err(_) => {
                    warn!(offset, "target id page timed out; skipping page");
                    stats.errors_skipped += 1;
                    offset += self.batch_size as u64;
                    continue;
                }
            };

            if !ids.is_empty() {
                stats.rows_scanned += ids.len() as u64;
                match self.bounded(self.base.existing_ids(&ids)).await {
                    Ok(Ok(present)) => {
                        for id in ids.iter().filter(|id| !present.contains(id)) {
                            self.notify(*id, InconsistencyKind::BaseMissing, &mut stats)
                                .await;
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, offset, "base membership check failed; skipping page");
                        stats.errors_skipped += 1;
                    }
                    Err(_) => {
                        warn!(offset, "base membership check timed out; skipping page");
                        stats.errors_skipped += 1;
                    }
                }
            }

            if ids.len() < self.batch_size {
                match self.mode {
                    ScanMode::Full => break,
                    // Caught up with the target: sleep and re-read the same
                    // page so freshly appended rows are picked up.
                    ScanMode::Incremental { .. } => {
                        if self.sleep_cancelled(cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            }
            offset += ids.len() as u64;
        }

        debug!(?stats, "reverse scan ended");
        stats
    }

    /// Publish one event; failures are logged and counted, never retried
    /// inline
    async fn notify(&self, id: i64, kind: InconsistencyKind, stats: &mut ScanStats) {
        let event = InconsistencyEvent::new(id, self.direction, kind);
        match self.producer.publish(&event).await {
            Ok(()) => stats.events_emitted += 1,
            Err(e) => {
                warn!(
                    error = %e,
                    id,
                    kind = ?kind,
                    "failed to publish inconsistency; a later pass will re-detect it"
                );
                stats.errors_skipped += 1;
            }
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = T>) -> Result<T, Elapsed> {
        timeout(self.scan_timeout, fut).await
    }

    /// Sleep for the configured interval; true means cancelled mid-sleep
    async fn sleep_cancelled(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.sleep_interval) => false,
        }
    }
}

impl<R: Entity> std::fmt::Debug for Validator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
