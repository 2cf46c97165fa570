//! End-to-end migration flows: validator, queue, and fix consumer wired
//! together the way a host process runs them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tandem_migrate::config::MigrateConfig;
use tandem_migrate::events::QueueEventProducer;
use tandem_migrate::fixer::FixConsumer;
use tandem_migrate::scheduler::Scheduler;
use tandem_migrate::testing::{wait_until, Interaction};
use tandem_migrate::validator::RunState;
use tandem_queue::{InProcessBus, Producer};
use tandem_store::memory::MemoryTable;
use tandem_store::pool::{DualWritePool, WritePattern};
use tandem_store::testing::StubConnection;

struct Pipeline {
    scheduler: Arc<Scheduler<Interaction>>,
    src: MemoryTable<Interaction>,
    dst: MemoryTable<Interaction>,
    bus: InProcessBus,
    config: MigrateConfig,
    fixer_cancel: CancellationToken,
    fixer_task: JoinHandle<()>,
}

/// Wire up pool, scheduler, queue and fix consumer over in-memory stores
async fn pipeline() -> Pipeline {
    let config = MigrateConfig::for_table("interactions");
    let bus = InProcessBus::new();
    let src: MemoryTable<Interaction> = MemoryTable::new();
    let dst: MemoryTable<Interaction> = MemoryTable::new();

    let producer = Arc::new(QueueEventProducer::new(
        Arc::new(bus.clone()),
        config.topic.clone(),
        config.publish_timeout,
    ));
    let pool = Arc::new(DualWritePool::new(
        Arc::new(StubConnection::new("src")),
        Arc::new(StubConnection::new("dst")),
    ));
    let scheduler = Arc::new(Scheduler::new(
        pool,
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        producer,
        config.clone(),
    ));

    let subscriber = bus.subscribe(&config.topic, &config.group).await;
    let consumer = Arc::new(FixConsumer::new(
        Arc::new(subscriber),
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        config.fix_timeout,
    ));
    let fixer_cancel = CancellationToken::new();
    let fixer_task = consumer.spawn(fixer_cancel.clone());

    Pipeline {
        scheduler,
        src,
        dst,
        bus,
        config,
        fixer_cancel,
        fixer_task,
    }
}

impl Pipeline {
    /// Poll until the full run finishes on its own
    async fn await_full_completion(&self) {
        for _ in 0..400 {
            if !self.scheduler.full_running().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("full validation did not complete");
    }

    async fn teardown(self) -> u64 {
        self.scheduler.shutdown().await;
        self.fixer_cancel.cancel();
        let _ = self.fixer_task.await;
        self.bus.committed(&self.config.group, &self.config.topic).await
    }
}

#[tokio::test]
async fn test_full_validation_converges_both_stores() {
    let p = pipeline().await;
    for id in 1..=4 {
        p.src.insert(Interaction::sample(id));
    }
    // Row 3 diverged, row 9 exists only in the destination
    p.dst.insert(Interaction::sample(3).with_likes(999));
    p.dst.insert(Interaction::sample(9));

    p.scheduler.start_full().await;
    wait_until(|| {
        p.dst.len() == 4 && p.dst.get(9).is_none() && p.dst.get(3) == p.src.get(3)
    })
    .await;

    for id in 1..=4 {
        assert_eq!(p.dst.get(id), p.src.get(id), "row {id} should converge");
    }
    // The base was never touched
    assert_eq!(p.src.len(), 4);
    assert_eq!(p.src.get(3).unwrap().like_cnt, 3);

    p.await_full_completion().await;
    let report = p.scheduler.stop_full().await.unwrap();
    assert_eq!(report.forward.events_emitted, 4);
    assert_eq!(report.reverse.events_emitted, 1);
    assert_eq!(report.state, RunState::Completed);

    p.teardown().await;
}

#[tokio::test]
async fn test_incremental_watermark_skips_stale_rows() {
    let p = pipeline().await;
    p.src.insert(Interaction::sample(1).with_utime(1_000));
    p.src.insert(Interaction::sample(2).with_utime(5_000));

    p.scheduler
        .start_incremental(2_000, Duration::from_millis(5))
        .await;
    wait_until(|| p.dst.get(2).is_some()).await;

    // The stale row sits below the watermark and is never compared
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(p.dst.get(1).is_none());
    assert_eq!(p.dst.get(2), p.src.get(2));

    // New rows past the watermark are picked up on a later poll
    p.src.insert(Interaction::sample(3).with_utime(6_000));
    wait_until(|| p.dst.get(3) == p.src.get(3)).await;
    assert!(p.dst.get(1).is_none());

    let report = p.scheduler.stop_incremental().await.unwrap();
    assert_eq!(report.state, RunState::Cancelled);

    p.teardown().await;
}

#[tokio::test]
async fn test_cutover_repairs_toward_the_new_primary() {
    let p = pipeline().await;
    // After cutover the destination is the system of record
    for id in 1..=3 {
        p.dst.insert(Interaction::sample(id));
    }
    p.src.insert(Interaction::sample(1));
    p.src.insert(Interaction::sample(2));

    p.scheduler.set_pattern(WritePattern::DstFirst).await;
    assert_eq!(p.scheduler.pool().pattern(), WritePattern::DstFirst);

    p.scheduler.start_full().await;
    wait_until(|| p.src.get(3).is_some()).await;

    assert_eq!(p.src.get(3), p.dst.get(3));
    assert_eq!(p.src.len(), 3);

    p.teardown().await;
}

#[tokio::test]
async fn test_full_and_incremental_share_the_repair_path() {
    let p = pipeline().await;
    p.src.insert(Interaction::sample(1));
    p.src.insert(Interaction::sample(2));

    p.scheduler.start_full().await;
    p.scheduler
        .start_incremental(0, Duration::from_millis(5))
        .await;
    assert!(p.scheduler.incremental_running().await);
    wait_until(|| p.dst.len() == 2).await;

    p.scheduler.shutdown().await;
    assert!(!p.scheduler.full_running().await);
    assert!(!p.scheduler.incremental_running().await);

    // Both repairs were delivered and acknowledged
    let committed = p.teardown().await;
    assert!(committed >= 2, "committed {committed} deliveries");
}

#[tokio::test]
async fn test_poison_event_does_not_wedge_repair() {
    let p = pipeline().await;
    p.bus
        .send(&p.config.topic, Bytes::from_static(b"garbage"))
        .await
        .unwrap();
    p.src.insert(Interaction::sample(1));

    p.scheduler.start_full().await;
    wait_until(|| p.dst.get(1).is_some()).await;

    // The undecodable message was acknowledged away, not redelivered
    let committed = p.teardown().await;
    assert!(committed >= 2, "committed {committed} deliveries");
}
