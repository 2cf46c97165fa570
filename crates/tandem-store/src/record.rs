//! Row-mapping contract and typed table access
//!
//! [`Record`] binds a Rust type to a table shape once, at compile time: table
//! name, column list, key column and update watermark. Everything the engine
//! does to a table (paged scans, key lookups, full-column upserts, deletes)
//! is derived from this contract, so no runtime schema introspection happens
//! on the hot path.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Row, Value};

/// Maps a Rust type onto a replicated table.
///
/// `values()` must produce one [`Value`] per entry of `columns()`, in the
/// same order; the upsert path writes every column through this mapping.
pub trait Record: Sized + Send + Sync {
    /// Table name
    fn table() -> &'static str;

    /// Full column list; upserts overwrite every one of these
    fn columns() -> &'static [&'static str];

    /// Primary key column
    fn id_column() -> &'static str {
        "id"
    }

    /// Update watermark column (epoch milliseconds)
    fn utime_column() -> &'static str {
        "utime"
    }

    /// Primary key of this row
    fn id(&self) -> i64;

    /// Update watermark of this row, epoch milliseconds
    fn updated_at_ms(&self) -> i64;

    /// Decode a row fetched with `columns()`
    fn from_row(row: &Row) -> Result<Self>;

    /// Encode this row; order matches `columns()`
    fn values(&self) -> Vec<Value>;
}

/// Read access to a table of `R`, in primary-key order
#[async_trait]
pub trait RecordReader<R: Record>: Send + Sync {
    /// Fetch the single row at `offset` in id order, if any
    async fn fetch_at(&self, offset: u64) -> Result<Option<R>>;

    /// Fetch the single row at `offset` among rows with
    /// `utime >= watermark_ms`, in id order
    async fn fetch_updated_at(&self, watermark_ms: i64, offset: u64) -> Result<Option<R>>;

    /// Fetch a row by primary key
    async fn find(&self, id: i64) -> Result<Option<R>>;

    /// Fetch up to `limit` ids starting at `offset`, in id order
    async fn ids_page(&self, offset: u64, limit: usize) -> Result<Vec<i64>>;

    /// Of the given ids, return those present in this table
    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>>;
}

/// Write access to a table of `R`
#[async_trait]
pub trait RecordWriter<R: Record>: Send + Sync {
    /// Insert or fully overwrite the row with the record's key
    async fn upsert(&self, record: &R) -> Result<()>;

    /// Delete the row with the given key; absent rows are a no-op
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Combined read/write access to a table of `R`
pub trait RecordStore<R: Record>: RecordReader<R> + RecordWriter<R> {}

impl<R: Record, T: RecordReader<R> + RecordWriter<R>> RecordStore<R> for T {}
