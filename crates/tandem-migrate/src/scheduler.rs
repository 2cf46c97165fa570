//! Migration scheduling
//!
//! The scheduler is the single owner of migration control state: the write
//! pattern, the dual-write pool, both typed stores, the event producer, and
//! the run slots for full and incremental validation. Operator actions
//! arrive through the HTTP surface and land here.
//!
//! The mutex guards bookkeeping only; the hot-path pattern lives in the
//! pool's atomic cell and is read lock-free by every write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tandem_store::pool::{DualWritePool, WritePattern};
use tandem_store::record::RecordStore;

use crate::config::MigrateConfig;
use crate::entity::Entity;
use crate::events::{Direction, EventProducer};
use crate::validator::{RunReport, Validator};

/// Handle on a spawned validation run
struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    fn spawn<R: Entity>(validator: Validator<R>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { validator.run(token).await });
        Self { cancel, task }
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel and wait for the run to unwind
    async fn stop(self) -> Option<RunReport> {
        self.cancel.cancel();
        match self.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "validation task did not shut down cleanly");
                None
            }
        }
    }
}

struct SchedulerState {
    pattern: WritePattern,
    full: Option<RunHandle>,
    incremental: Option<RunHandle>,
}

/// Coordinates pattern switches and validation runs over one migrated table
pub struct Scheduler<R: Entity> {
    state: Mutex<SchedulerState>,
    pool: Arc<DualWritePool>,
    src: Arc<dyn RecordStore<R>>,
    dst: Arc<dyn RecordStore<R>>,
    producer: Arc<dyn EventProducer>,
    config: MigrateConfig,
}

impl<R: Entity> Scheduler<R> {
    /// Build a scheduler; the initial pattern is taken from the pool
    pub fn new(
        pool: Arc<DualWritePool>,
        src: Arc<dyn RecordStore<R>>,
        dst: Arc<dyn RecordStore<R>>,
        producer: Arc<dyn EventProducer>,
        config: MigrateConfig,
    ) -> Self {
        let pattern = pool.pattern();
        Self {
            state: Mutex::new(SchedulerState {
                pattern,
                full: None,
                incremental: None,
            }),
            pool,
            src,
            dst,
            producer,
            config,
        }
    }

    /// The active write pattern
    pub async fn pattern(&self) -> WritePattern {
        self.state.lock().await.pattern
    }

    /// The dual-write pool this scheduler controls
    pub fn pool(&self) -> &Arc<DualWritePool> {
        &self.pool
    }

    /// Switch the write pattern; the pool and the mirror move as a pair
    pub async fn set_pattern(&self, pattern: WritePattern) {
        let mut state = self.state.lock().await;
        state.pattern = pattern;
        self.pool.update_pattern(pattern);
        info!(%pattern, "write pattern switched");
    }

    /// Start full validation against the current pattern
    ///
    /// A run already in the slot is cancelled and awaited first, so at most
    /// one full run is ever live.
    pub async fn start_full(&self) {
        let mut state = self.state.lock().await;
        let validator = self.build_validator(state.pattern).full();
        if let Some(previous) = state.full.take() {
            previous.stop().await;
        }
        info!("starting full validation");
        state.full = Some(RunHandle::spawn(validator));
    }

    /// Stop full validation; returns its report, `None` when nothing ran
    pub async fn stop_full(&self) -> Option<RunReport> {
        let handle = self.state.lock().await.full.take();
        match handle {
            Some(handle) => {
                info!("stopping full validation");
                handle.stop().await
            }
            None => None,
        }
    }

    /// Start incremental validation from `watermark_ms`, polling every
    /// `interval` once caught up
    ///
    /// Supersedes a live incremental run the same way [`Self::start_full`]
    /// does.
    pub async fn start_incremental(&self, watermark_ms: i64, interval: Duration) {
        let mut state = self.state.lock().await;
        let validator = self
            .build_validator(state.pattern)
            .incremental(watermark_ms)
            .sleep_interval(interval);
        if let Some(previous) = state.incremental.take() {
            previous.stop().await;
        }
        info!(watermark_ms, ?interval, "starting incremental validation");
        state.incremental = Some(RunHandle::spawn(validator));
    }

    /// Stop incremental validation; returns its report, `None` when nothing
    /// ran
    pub async fn stop_incremental(&self) -> Option<RunReport> {
        let handle = self.state.lock().await.incremental.take();
        match handle {
            Some(handle) => {
                info!("stopping incremental validation");
                handle.stop().await
            }
            None => None,
        }
    }

    /// Whether a full run is live
    pub async fn full_running(&self) -> bool {
        self.state
            .lock()
            .await
            .full
            .as_ref()
            .is_some_and(RunHandle::is_running)
    }

    /// Whether an incremental run is live
    pub async fn incremental_running(&self) -> bool {
        self.state
            .lock()
            .await
            .incremental
            .as_ref()
            .is_some_and(RunHandle::is_running)
    }

    /// Stop both runs
    pub async fn shutdown(&self) {
        self.stop_full().await;
        self.stop_incremental().await;
    }

    /// Base, target and direction follow the pattern: the primary store is
    /// the base
    fn build_validator(&self, pattern: WritePattern) -> Validator<R> {
        let (base, target, direction) = if pattern.src_is_primary() {
            (self.src.clone(), self.dst.clone(), Direction::Src)
        } else {
            (self.dst.clone(), self.src.clone(), Direction::Dst)
        };
        Validator::new(base, target, direction, self.producer.clone())
            .with_batch_size(self.config.batch_size)
            .with_scan_timeout(self.config.scan_timeout)
    }
}

impl<R: Entity> std::fmt::Debug for Scheduler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pattern", &self.pool.pattern())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InconsistencyKind;
    use crate::testing::{wait_until, CollectingProducer, Interaction};
    use crate::validator::RunState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_store::memory::MemoryTable;
    use tandem_store::record::{RecordReader, RecordWriter};
    use tandem_store::testing::StubConnection;

    struct Fixture {
        scheduler: Arc<Scheduler<Interaction>>,
        pool: Arc<DualWritePool>,
        src: MemoryTable<Interaction>,
        dst: MemoryTable<Interaction>,
        producer: CollectingProducer,
    }

    fn fixture() -> Fixture {
        let pool = Arc::new(DualWritePool::new(
            Arc::new(StubConnection::new("src")),
            Arc::new(StubConnection::new("dst")),
        ));
        let src: MemoryTable<Interaction> = MemoryTable::new();
        let dst: MemoryTable<Interaction> = MemoryTable::new();
        let producer = CollectingProducer::new();
        let scheduler = Arc::new(Scheduler::new(
            pool.clone(),
            Arc::new(src.clone()),
            Arc::new(dst.clone()),
            Arc::new(producer.clone()),
            MigrateConfig::default(),
        ));
        Fixture {
            scheduler,
            pool,
            src,
            dst,
            producer,
        }
    }

    #[tokio::test]
    async fn test_set_pattern_moves_mirror_and_pool_together() {
        let f = fixture();
        assert_eq!(f.scheduler.pattern().await, WritePattern::SrcOnly);

        f.scheduler.set_pattern(WritePattern::SrcFirst).await;

        assert_eq!(f.scheduler.pattern().await, WritePattern::SrcFirst);
        assert_eq!(f.pool.pattern(), WritePattern::SrcFirst);
    }

    #[tokio::test]
    async fn test_full_run_detects_and_completes() {
        let f = fixture();
        f.src.insert(Interaction::sample(1));
        f.src.insert(Interaction::sample(2));
        // dst lacks both rows

        f.scheduler.start_full().await;
        wait_until(|| f.producer.count() == 2).await;

        let report = f.scheduler.stop_full().await.unwrap();
        assert_eq!(report.forward.events_emitted, 2);
        assert!(!f.scheduler.full_running().await);
    }

    #[tokio::test]
    async fn test_stop_without_a_run_is_a_noop() {
        let f = fixture();
        assert!(f.scheduler.stop_full().await.is_none());
        assert!(f.scheduler.stop_incremental().await.is_none());
    }

    #[tokio::test]
    async fn test_direction_follows_the_pattern() {
        let f = fixture();
        // Destination is primary: base = dst, so its extra row is flagged as
        // missing from the target (the source)
        f.dst.insert(Interaction::sample(5));
        f.scheduler.set_pattern(WritePattern::DstFirst).await;

        f.scheduler.start_full().await;
        wait_until(|| f.producer.count() >= 1).await;
        f.scheduler.stop_full().await;

        let events = f.producer.events();
        assert_eq!(events[0].direction, Direction::Dst);
        assert_eq!(events[0].kind, InconsistencyKind::TargetMissing);
        assert_eq!(events[0].id, 5);
    }

    #[tokio::test]
    async fn test_incremental_lifecycle() {
        let f = fixture();
        f.src.insert(Interaction::sample(1).with_utime(500));

        f.scheduler
            .start_incremental(100, Duration::from_millis(5))
            .await;
        assert!(f.scheduler.incremental_running().await);
        wait_until(|| f.producer.count() >= 1).await;

        let report = f.scheduler.stop_incremental().await.unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert!(!f.scheduler.incremental_running().await);
    }

    /// Store that tracks how many forward scans touch it at once
    struct SlowStore {
        inner: MemoryTable<Interaction>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowStore {
        fn new(inner: MemoryTable<Interaction>) -> Self {
            Self {
                inner,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RecordReader<Interaction> for SlowStore {
        async fn fetch_at(&self, offset: u64) -> tandem_store::Result<Option<Interaction>> {
            let live = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(live, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            let result = self.inner.fetch_at(offset).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn fetch_updated_at(
            &self,
            watermark_ms: i64,
            offset: u64,
        ) -> tandem_store::Result<Option<Interaction>> {
            self.inner.fetch_updated_at(watermark_ms, offset).await
        }

        async fn find(&self, id: i64) -> tandem_store::Result<Option<Interaction>> {
            self.inner.find(id).await
        }

        async fn ids_page(&self, offset: u64, limit: usize) -> tandem_store::Result<Vec<i64>> {
            self.inner.ids_page(offset, limit).await
        }

        async fn existing_ids(&self, ids: &[i64]) -> tandem_store::Result<Vec<i64>> {
            self.inner.existing_ids(ids).await
        }
    }

    #[async_trait::async_trait]
    impl RecordWriter<Interaction> for SlowStore {
        async fn upsert(&self, record: &Interaction) -> tandem_store::Result<()> {
            self.inner.upsert(record).await
        }

        async fn delete(&self, id: i64) -> tandem_store::Result<()> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_restart_supersedes_the_previous_run() {
        let src: MemoryTable<Interaction> = MemoryTable::new();
        for id in 1..=50 {
            src.insert(Interaction::sample(id));
        }
        let slow_src = Arc::new(SlowStore::new(src));
        let dst: MemoryTable<Interaction> = MemoryTable::new();

        let pool = Arc::new(DualWritePool::new(
            Arc::new(StubConnection::new("src")),
            Arc::new(StubConnection::new("dst")),
        ));
        let scheduler = Scheduler::new(
            pool,
            slow_src.clone(),
            Arc::new(dst),
            Arc::new(CollectingProducer::new()),
            MigrateConfig::default(),
        );

        scheduler.start_full().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The restart must fully stop the first run before spawning
        scheduler.start_full().await;
        scheduler.stop_full().await;

        assert_eq!(slow_src.peak.load(Ordering::SeqCst), 1);
    }
}
