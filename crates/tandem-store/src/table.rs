//! SQL-backed record access
//!
//! [`SqlTable`] maps a [`Record`] type onto a database table through a
//! [`Connection`] and a [`SqlDialect`]. Statements whose shape is fixed
//! (upsert, delete, point lookup) are rendered once at construction; paged
//! scans are rendered per call because limit and offset are inlined.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::Result;
use crate::record::{Record, RecordReader, RecordWriter};
use crate::types::Value;

use async_trait::async_trait;

/// Record reader/writer over a SQL table
pub struct SqlTable<R: Record> {
    conn: Arc<dyn Connection>,
    dialect: Box<dyn SqlDialect>,
    upsert_sql: String,
    delete_sql: String,
    select_by_id_sql: String,
    watermark_where: String,
    _marker: PhantomData<R>,
}

impl<R: Record> SqlTable<R> {
    /// Create a table handle; statements are rendered from `R`'s metadata
    pub fn new(conn: Arc<dyn Connection>, dialect: Box<dyn SqlDialect>) -> Self {
        let upsert_sql = dialect.upsert_sql(R::table(), R::id_column(), R::columns());
        let delete_sql = dialect.delete_sql(R::table(), R::id_column());
        let id_where = format!(
            "{} = {}",
            dialect.quote_identifier(R::id_column()),
            dialect.placeholder(1)
        );
        let select_by_id_sql =
            dialect.build_select(R::table(), R::columns(), Some(&id_where), None, Some(1), None);
        let watermark_where = format!(
            "{} >= {}",
            dialect.quote_identifier(R::utime_column()),
            dialect.placeholder(1)
        );

        Self {
            conn,
            dialect,
            upsert_sql,
            delete_sql,
            select_by_id_sql,
            watermark_where,
            _marker: PhantomData,
        }
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }
}

impl<R: Record> fmt::Debug for SqlTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlTable")
            .field("table", &R::table())
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

#[async_trait]
impl<R: Record> RecordReader<R> for SqlTable<R> {
    async fn fetch_at(&self, offset: u64) -> Result<Option<R>> {
        let order = [(R::id_column(), true)];
        let sql = self.dialect.build_select(
            R::table(),
            R::columns(),
            None,
            Some(&order),
            Some(1),
            Some(offset),
        );
        match self.conn.query_one(&sql, &[]).await? {
            Some(row) => Ok(Some(R::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_updated_at(&self, watermark_ms: i64, offset: u64) -> Result<Option<R>> {
        let order = [(R::id_column(), true)];
        let sql = self.dialect.build_select(
            R::table(),
            R::columns(),
            Some(&self.watermark_where),
            Some(&order),
            Some(1),
            Some(offset),
        );
        match self
            .conn
            .query_one(&sql, &[Value::Int64(watermark_ms)])
            .await?
        {
            Some(row) => Ok(Some(R::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn find(&self, id: i64) -> Result<Option<R>> {
        match self
            .conn
            .query_one(&self.select_by_id_sql, &[Value::Int64(id)])
            .await?
        {
            Some(row) => Ok(Some(R::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn ids_page(&self, offset: u64, limit: usize) -> Result<Vec<i64>> {
        let columns = [R::id_column()];
        let order = [(R::id_column(), true)];
        let sql = self.dialect.build_select(
            R::table(),
            &columns,
            None,
            Some(&order),
            Some(limit as u64),
            Some(offset),
        );
        let rows = self.conn.query(&sql, &[]).await?;
        rows.iter().map(|row| row.try_i64(R::id_column())).collect()
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_quoted = self.dialect.quote_identifier(R::id_column());
        let placeholders: Vec<String> = (1..=ids.len())
            .map(|i| self.dialect.placeholder(i))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({})",
            id_quoted,
            self.dialect.quote_identifier(R::table()),
            id_quoted,
            placeholders.join(", ")
        );
        let params: Vec<Value> = ids.iter().map(|&id| Value::Int64(id)).collect();
        let rows = self.conn.query(&sql, &params).await?;
        rows.iter().map(|row| row.try_i64(R::id_column())).collect()
    }
}

#[async_trait]
impl<R: Record> RecordWriter<R> for SqlTable<R> {
    async fn upsert(&self, record: &R) -> Result<()> {
        self.conn
            .execute(&self.upsert_sql, &record.values())
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.conn
            .execute(&self.delete_sql, &[Value::Int64(id)])
            .await?;
        Ok(())
    }
}
