//! Testing utilities for tandem-migrate
//!
//! Shared fixtures for engine tests: a realistic sample entity, a producer
//! that collects events in memory, and a store wrapper that injects
//! failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tandem_queue::QueueError;
use tandem_store::record::{Record, RecordReader, RecordStore, RecordWriter};
use tandem_store::{Error as StoreError, Row, Value};

use crate::error::Result;
use crate::events::{EventProducer, InconsistencyEvent};

// ===========================================================================
// Sample entity
// ===========================================================================

/// Engagement-counter row in the shape of a typical migrated table
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    /// Primary key
    pub id: i64,
    /// Business domain tag
    pub biz: String,
    /// Id within the business domain
    pub biz_id: i64,
    /// View counter
    pub read_cnt: i64,
    /// Like counter
    pub like_cnt: i64,
    /// Favorite counter
    pub collect_cnt: i64,
    /// Created at, epoch millis
    pub ctime: i64,
    /// Updated at, epoch millis
    pub utime: i64,
}

impl Interaction {
    /// Deterministic sample row for `id`
    pub fn sample(id: i64) -> Self {
        Self {
            id,
            biz: "article".to_string(),
            biz_id: id * 100,
            read_cnt: id * 3,
            like_cnt: id,
            collect_cnt: 0,
            ctime: 1_700_000_000_000 + id,
            utime: 1_700_000_000_000 + id,
        }
    }

    /// Same row with a different like counter
    pub fn with_likes(mut self, like_cnt: i64) -> Self {
        self.like_cnt = like_cnt;
        self
    }

    /// Same row with a different update timestamp
    pub fn with_utime(mut self, utime: i64) -> Self {
        self.utime = utime;
        self
    }
}

impl Record for Interaction {
    fn table() -> &'static str {
        "interactions"
    }

    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "biz",
            "biz_id",
            "read_cnt",
            "like_cnt",
            "collect_cnt",
            "ctime",
            "utime",
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn updated_at_ms(&self) -> i64 {
        self.utime
    }

    fn from_row(row: &Row) -> tandem_store::Result<Self> {
        Ok(Self {
            id: row.try_i64("id")?,
            biz: row.try_string("biz")?,
            biz_id: row.try_i64("biz_id")?,
            read_cnt: row.try_i64("read_cnt")?,
            like_cnt: row.try_i64("like_cnt")?,
            collect_cnt: row.try_i64("collect_cnt")?,
            ctime: row.try_i64("ctime")?,
            utime: row.try_i64("utime")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.id),
            Value::String(self.biz.clone()),
            Value::Int64(self.biz_id),
            Value::Int64(self.read_cnt),
            Value::Int64(self.like_cnt),
            Value::Int64(self.collect_cnt),
            Value::Int64(self.ctime),
            Value::Int64(self.utime),
        ]
    }
}

// ===========================================================================
// Collecting producer
// ===========================================================================

/// [`EventProducer`] that collects events in memory
#[derive(Clone, Default)]
pub struct CollectingProducer {
    events: Arc<Mutex<Vec<InconsistencyEvent>>>,
    fail: Arc<Mutex<Option<String>>>,
}

impl CollectingProducer {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail with `message`
    pub fn fail_with(self, message: impl Into<String>) -> Self {
        *self.fail.lock() = Some(message.into());
        self
    }

    /// Events published so far
    pub fn events(&self) -> Vec<InconsistencyEvent> {
        self.events.lock().clone()
    }

    /// Number of events published
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl EventProducer for CollectingProducer {
    async fn publish(&self, event: &InconsistencyEvent) -> Result<()> {
        if let Some(message) = self.fail.lock().clone() {
            return Err(QueueError::publish(message).into());
        }
        self.events.lock().push(*event);
        Ok(())
    }
}

// ===========================================================================
// Flaky store
// ===========================================================================

/// Wraps a store and fails the next N reads or writes on request
pub struct FlakyStore<R> {
    inner: Arc<dyn RecordStore<R>>,
    read_failures: Arc<AtomicUsize>,
    write_failures: Arc<AtomicUsize>,
}

impl<R> Clone for FlakyStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            read_failures: self.read_failures.clone(),
            write_failures: self.write_failures.clone(),
        }
    }
}

impl<R: Record> FlakyStore<R> {
    /// Wrap a store; no failures are injected until requested
    pub fn wrap(inner: Arc<dyn RecordStore<R>>) -> Self {
        Self {
            inner,
            read_failures: Arc::new(AtomicUsize::new(0)),
            write_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `n` read calls
    pub fn fail_reads(&self, n: usize) {
        self.read_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` write calls
    pub fn fail_writes(&self, n: usize) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    fn take(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<R: Record> RecordReader<R> for FlakyStore<R> {
    async fn fetch_at(&self, offset: u64) -> tandem_store::Result<Option<R>> {
        if Self::take(&self.read_failures) {
            return Err(StoreError::connection("injected read failure"));
        }
        self.inner.fetch_at(offset).await
    }

    async fn fetch_updated_at(
        &self,
        watermark_ms: i64,
        offset: u64,
    ) -> tandem_store::Result<Option<R>> {
        if Self::take(&self.read_failures) {
            return Err(StoreError::connection("injected read failure"));
        }
        self.inner.fetch_updated_at(watermark_ms, offset).await
    }

    async fn find(&self, id: i64) -> tandem_store::Result<Option<R>> {
        if Self::take(&self.read_failures) {
            return Err(StoreError::connection("injected read failure"));
        }
        self.inner.find(id).await
    }

    async fn ids_page(&self, offset: u64, limit: usize) -> tandem_store::Result<Vec<i64>> {
        if Self::take(&self.read_failures) {
            return Err(StoreError::connection("injected read failure"));
        }
        self.inner.ids_page(offset, limit).await
    }

    async fn existing_ids(&self, ids: &[i64]) -> tandem_store::Result<Vec<i64>> {
        if Self::take(&self.read_failures) {
            return Err(StoreError::connection("injected read failure"));
        }
        self.inner.existing_ids(ids).await
    }
}

#[async_trait]
impl<R: Record> RecordWriter<R> for FlakyStore<R> {
    async fn upsert(&self, record: &R) -> tandem_store::Result<()> {
        if Self::take(&self.write_failures) {
            return Err(StoreError::connection("injected write failure"));
        }
        self.inner.upsert(record).await
    }

    async fn delete(&self, id: i64) -> tandem_store::Result<()> {
        if Self::take(&self.write_failures) {
            return Err(StoreError::connection("injected write failure"));
        }
        self.inner.delete(id).await
    }
}

// ===========================================================================
// Polling helper
// ===========================================================================

/// Poll `cond` every few milliseconds until it holds; panics after ~2s
///
/// For tests that wait on background tasks (validator runs, fix consumers)
/// to converge.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, InconsistencyKind};
    use tandem_store::memory::MemoryTable;

    #[test]
    fn test_interaction_row_mapping_is_consistent() {
        let row = Interaction::sample(5).with_likes(17);
        let rebuilt = Interaction::from_row(&Row::new(
            Interaction::columns().iter().map(|c| c.to_string()).collect(),
            row.values(),
        ))
        .unwrap();
        assert_eq!(rebuilt, row);
    }

    #[tokio::test]
    async fn test_collecting_producer_records_events() {
        let producer = CollectingProducer::new();
        let event = InconsistencyEvent::new(1, Direction::Src, InconsistencyKind::NotEqual);
        producer.publish(&event).await.unwrap();
        assert_eq!(producer.events(), vec![event]);
    }

    #[tokio::test]
    async fn test_collecting_producer_failure_mode() {
        let producer = CollectingProducer::new().fail_with("queue full");
        let event = InconsistencyEvent::new(1, Direction::Src, InconsistencyKind::NotEqual);
        assert!(producer.publish(&event).await.is_err());
        assert_eq!(producer.count(), 0);
    }

    #[tokio::test]
    async fn test_flaky_store_consumes_its_budget() {
        let table: MemoryTable<Interaction> = MemoryTable::new();
        table.insert(Interaction::sample(1));
        let flaky = FlakyStore::wrap(Arc::new(table));

        flaky.fail_reads(2);
        assert!(flaky.find(1).await.is_err());
        assert!(flaky.find(1).await.is_err());
        assert!(flaky.find(1).await.unwrap().is_some());
    }
}
