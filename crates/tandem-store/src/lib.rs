//! # tandem-store
//!
//! Store access layer for the tandem migration engine.
//!
//! ## Features
//!
//! - **Connection traits**: async [`Connection`](connection::Connection),
//!   [`Transaction`](connection::Transaction) and prepared-statement
//!   interfaces over any relational store
//! - **Dynamic values**: [`Value`] and [`Row`] for result sets without
//!   compile-time schemas
//! - **SQL dialects**: PostgreSQL and MySQL statement generation with
//!   identifier quoting, placeholders and upserts
//! - **Typed records**: [`Record`](record::Record) metadata plus
//!   [`SqlTable`](table::SqlTable) and [`MemoryTable`](memory::MemoryTable)
//!   backends behind one reader/writer interface
//! - **Dual-write pool**: [`DualWritePool`](pool::DualWritePool) routes
//!   reads and writes across two stores by a switchable
//!   [`WritePattern`](pool::WritePattern) for zero-downtime migrations

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod memory;
pub mod pool;
pub mod record;
pub mod table;
pub mod testing;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use types::{Row, Value};

/// Commonly used types
pub mod prelude {
    pub use crate::connection::{Connection, IsolationLevel, PreparedStatement, Transaction};
    pub use crate::dialect::{dialect_for, MySqlDialect, PostgresDialect, SqlDialect};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::memory::MemoryTable;
    pub use crate::pool::{DualWritePool, PatternCell, PoolStats, WritePattern};
    pub use crate::record::{Record, RecordReader, RecordStore, RecordWriter};
    pub use crate::table::SqlTable;
    pub use crate::types::{Row, Value};
}
