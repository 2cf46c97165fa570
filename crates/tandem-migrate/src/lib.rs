//! tandem-migrate - Zero-downtime migration engine for tandem
//!
//! Moves a live table from a source database to a destination database with
//! no write freeze: application writes fan out through a switchable
//! dual-write pool, a validator scans both stores for drift, and repair
//! workers converge the lagging side from inconsistency events on a queue.
//!
//! # Architecture
//!
//! ```text
//! application writes
//!        │
//!        ▼
//!  DualWritePool (src_only → src_first → dst_first → dst_only)
//!        │
//!   src ─┴─ dst
//!    ▲       ▲
//!    │       │                 ┌──────────────┐
//!  Validator ──── events ────▶ │ tandem-queue │ ────▶ FixConsumer
//!  (full / incremental)        └──────────────┘       (re-reads base,
//!                                                      upserts/deletes)
//! ```
//!
//! The `Scheduler` owns the moving parts and the `http` module exposes them
//! to operators.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tandem_migrate::prelude::*;
//!
//! let pool = Arc::new(DualWritePool::new(src_conn, dst_conn));
//! let scheduler = Arc::new(Scheduler::new(
//!     pool,
//!     src_store,
//!     dst_store,
//!     producer,
//!     MigrateConfig::for_table("interactions"),
//! ));
//! let app = scheduler_router(scheduler.clone());
//!
//! scheduler.start_full().await;
//! // ... drain inconsistencies, then flip:
//! scheduler.set_pattern(WritePattern::DstFirst).await;
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod fixer;
pub mod http;
pub mod scheduler;
pub mod validator;

// Test doubles and fixtures shared by unit and integration tests
pub mod testing;

pub use config::MigrateConfig;
pub use entity::Entity;
pub use error::{MigrateError, Result};
pub use events::{
    Direction, EventProducer, InconsistencyEvent, InconsistencyKind, QueueEventProducer,
};
pub use fixer::{FixConsumer, FixOutcome, Fixer};
pub use http::{scheduler_router, Reply, StartIncrRequest};
pub use scheduler::Scheduler;
pub use validator::{RunReport, RunState, ScanMode, ScanStats, Validator};

/// One-stop imports for hosts wiring up a migration
pub mod prelude {
    pub use crate::config::MigrateConfig;
    pub use crate::entity::Entity;
    pub use crate::error::{MigrateError, Result};
    pub use crate::events::{
        Direction, EventProducer, InconsistencyEvent, InconsistencyKind, QueueEventProducer,
    };
    pub use crate::fixer::{FixConsumer, Fixer};
    pub use crate::http::{scheduler_router, Reply, StartIncrRequest};
    pub use crate::scheduler::Scheduler;
    pub use crate::validator::{RunReport, RunState, Validator};
    pub use tandem_store::pool::{DualWritePool, WritePattern};
}
