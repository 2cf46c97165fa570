//! In-memory record store
//!
//! Backed by an id-keyed `BTreeMap`, so iteration order matches the
//! id-ordered scans of the SQL tables and the two backends are
//! interchangeable in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::record::{Record, RecordReader, RecordWriter};

/// In-memory table of records, ordered by id
pub struct MemoryTable<R> {
    rows: Arc<RwLock<BTreeMap<i64, R>>>,
}

impl<R> Clone for MemoryTable<R> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
        }
    }
}

impl<R> Default for MemoryTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> MemoryTable<R> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// All ids in ascending order
    pub fn ids(&self) -> Vec<i64> {
        self.rows.read().keys().copied().collect()
    }

    /// Remove every row
    pub fn clear(&self) {
        self.rows.write().clear();
    }
}

impl<R: Record + Clone> MemoryTable<R> {
    /// Insert a record directly (test seeding)
    pub fn insert(&self, record: R) {
        self.rows.write().insert(record.id(), record);
    }

    /// Fetch a record by id without going through the reader trait
    pub fn get(&self, id: i64) -> Option<R> {
        self.rows.read().get(&id).cloned()
    }
}

#[async_trait]
impl<R: Record + Clone> RecordReader<R> for MemoryTable<R> {
    async fn fetch_at(&self, offset: u64) -> Result<Option<R>> {
        Ok(self.rows.read().values().nth(offset as usize).cloned())
    }

    async fn fetch_updated_at(&self, watermark_ms: i64, offset: u64) -> Result<Option<R>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.updated_at_ms() >= watermark_ms)
            .nth(offset as usize)
            .cloned())
    }

    async fn find(&self, id: i64) -> Result<Option<R>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn ids_page(&self, offset: u64, limit: usize) -> Result<Vec<i64>> {
        Ok(self
            .rows
            .read()
            .keys()
            .skip(offset as usize)
            .take(limit)
            .copied()
            .collect())
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let rows = self.rows.read();
        Ok(ids.iter().filter(|id| rows.contains_key(id)).copied().collect())
    }
}

#[async_trait]
impl<R: Record + Clone> RecordWriter<R> for MemoryTable<R> {
    async fn upsert(&self, record: &R) -> Result<()> {
        self.rows.write().insert(record.id(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.rows.write().remove(&id);
        Ok(())
    }
}
