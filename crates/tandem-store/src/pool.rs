//! Dual-write connection pool
//!
//! [`DualWritePool`] fronts two stores during a live migration and routes
//! traffic according to a switchable [`WritePattern`]:
//!
//! | Pattern    | Writes                    | Reads |
//! |------------|---------------------------|-------|
//! | `SrcOnly`  | src                       | src   |
//! | `SrcFirst` | src, then mirrored to dst | src   |
//! | `DstFirst` | dst, then mirrored to src | dst   |
//! | `DstOnly`  | dst                       | dst   |
//!
//! The primary store is synchronous and authoritative: its errors propagate
//! to the caller. The mirrored store is best-effort: its errors are logged
//! and counted, never surfaced. Reads always go to the primary store alone,
//! so a caller never observes half-mirrored state.
//!
//! The pattern can be switched at any time without draining in-flight work.
//! Transactions capture the pattern at `begin` and keep it until they
//! resolve, so a switch mid-transaction cannot split one transaction across
//! different routing decisions.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::connection::{Connection, IsolationLevel, PreparedStatement, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

// ===========================================================================
// Write patterns
// ===========================================================================

/// Routing mode for a dual-write pool
///
/// The numeric values are stable and used for atomic storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WritePattern {
    /// All traffic to the source store
    SrcOnly = 0,
    /// Source is primary, destination mirrored
    SrcFirst = 1,
    /// Destination is primary, source mirrored
    DstFirst = 2,
    /// All traffic to the destination store
    DstOnly = 3,
}

impl WritePattern {
    /// Canonical lowercase name, as used on the operator surface
    pub const fn as_str(&self) -> &'static str {
        match self {
            WritePattern::SrcOnly => "src_only",
            WritePattern::SrcFirst => "src_first",
            WritePattern::DstFirst => "dst_first",
            WritePattern::DstOnly => "dst_only",
        }
    }

    /// Whether the source store is the primary under this pattern
    pub const fn src_is_primary(&self) -> bool {
        matches!(self, WritePattern::SrcOnly | WritePattern::SrcFirst)
    }

    /// Whether only one store receives writes
    pub const fn is_single(&self) -> bool {
        matches!(self, WritePattern::SrcOnly | WritePattern::DstOnly)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => WritePattern::SrcFirst,
            2 => WritePattern::DstFirst,
            3 => WritePattern::DstOnly,
            _ => WritePattern::SrcOnly,
        }
    }
}

impl std::fmt::Display for WritePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WritePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "src_only" => Ok(WritePattern::SrcOnly),
            "src_first" => Ok(WritePattern::SrcFirst),
            "dst_first" => Ok(WritePattern::DstFirst),
            "dst_only" => Ok(WritePattern::DstOnly),
            other => Err(Error::config(format!("unknown write pattern: {}", other))),
        }
    }
}

/// Atomic cell holding the active [`WritePattern`]
///
/// Stores with `Release`, loads with `Acquire`: a reader that observes a new
/// pattern also observes everything the switching thread did before the
/// switch.
#[derive(Debug)]
pub struct PatternCell(AtomicU8);

impl PatternCell {
    /// Create a cell holding `pattern`
    pub fn new(pattern: WritePattern) -> Self {
        Self(AtomicU8::new(pattern as u8))
    }

    /// Read the active pattern
    pub fn load(&self) -> WritePattern {
        WritePattern::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replace the active pattern
    pub fn store(&self, pattern: WritePattern) {
        self.0.store(pattern as u8, Ordering::Release);
    }
}

// ===========================================================================
// Pool statistics
// ===========================================================================

/// Point-in-time snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Statements applied to the source store (primary or mirrored)
    pub writes_src: u64,
    /// Statements applied to the destination store (primary or mirrored)
    pub writes_dst: u64,
    /// Mirrored operations that failed and were dropped
    pub mirror_failures: u64,
    /// Transactions begun
    pub transactions: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    writes_src: AtomicU64,
    writes_dst: AtomicU64,
    mirror_failures: AtomicU64,
    transactions: AtomicU64,
}

impl AtomicPoolStats {
    fn record_write(&self, to_src: bool) {
        if to_src {
            self.writes_src.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes_dst.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_mirror_failure(&self) {
        self.mirror_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            writes_src: self.writes_src.load(Ordering::Relaxed),
            writes_dst: self.writes_dst.load(Ordering::Relaxed),
            mirror_failures: self.mirror_failures.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
        }
    }
}

// ===========================================================================
// Dual-write pool
// ===========================================================================

/// A [`Connection`] that fans writes out over two stores per the active
/// [`WritePattern`]
///
/// Implements [`Connection`] itself, so anything that runs over a single
/// connection (a `SqlTable`, ad-hoc statements) runs unchanged over the
/// pool.
pub struct DualWritePool {
    src: Arc<dyn Connection>,
    dst: Arc<dyn Connection>,
    pattern: PatternCell,
    stats: Arc<AtomicPoolStats>,
}

impl DualWritePool {
    /// Create a pool starting in [`WritePattern::SrcOnly`]
    pub fn new(src: Arc<dyn Connection>, dst: Arc<dyn Connection>) -> Self {
        Self::with_pattern(src, dst, WritePattern::SrcOnly)
    }

    /// Create a pool starting in the given pattern
    pub fn with_pattern(
        src: Arc<dyn Connection>,
        dst: Arc<dyn Connection>,
        pattern: WritePattern,
    ) -> Self {
        Self {
            src,
            dst,
            pattern: PatternCell::new(pattern),
            stats: Arc::new(AtomicPoolStats::default()),
        }
    }

    /// The active pattern
    pub fn pattern(&self) -> WritePattern {
        self.pattern.load()
    }

    /// Switch the active pattern
    ///
    /// Takes effect for operations that start after the switch; transactions
    /// already begun keep the pattern they captured.
    pub fn update_pattern(&self, pattern: WritePattern) {
        self.pattern.store(pattern);
    }

    /// Snapshot of pool counters
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// The source store
    pub fn src(&self) -> &Arc<dyn Connection> {
        &self.src
    }

    /// The destination store
    pub fn dst(&self) -> &Arc<dyn Connection> {
        &self.dst
    }

    fn primary(&self, pattern: WritePattern) -> &Arc<dyn Connection> {
        if pattern.src_is_primary() {
            &self.src
        } else {
            &self.dst
        }
    }

    fn secondary(&self, pattern: WritePattern) -> Option<&Arc<dyn Connection>> {
        match pattern {
            WritePattern::SrcFirst => Some(&self.dst),
            WritePattern::DstFirst => Some(&self.src),
            WritePattern::SrcOnly | WritePattern::DstOnly => None,
        }
    }

    async fn begin_tx(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>> {
        let pattern = self.pattern.load();

        let primary = match isolation {
            Some(level) => self.primary(pattern).begin_with_isolation(level).await?,
            None => self.primary(pattern).begin().await?,
        };

        let secondary = match self.secondary(pattern) {
            Some(conn) => {
                let begun = match isolation {
                    Some(level) => conn.begin_with_isolation(level).await,
                    None => conn.begin().await,
                };
                match begun {
                    Ok(tx) => Some(tx),
                    Err(e) => {
                        error!(
                            error = %e,
                            pattern = %pattern,
                            "mirrored transaction failed to begin; continuing on primary only"
                        );
                        self.stats.record_mirror_failure();
                        None
                    }
                }
            }
            None => None,
        };

        self.stats.record_transaction();
        Ok(Box::new(DualWriteTransaction {
            primary,
            secondary,
            pattern,
            stats: self.stats.clone(),
        }))
    }
}

impl std::fmt::Debug for DualWritePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualWritePool")
            .field("pattern", &self.pattern.load())
            .finish()
    }
}

#[async_trait]
impl Connection for DualWritePool {
    /// Reads go to the primary store alone
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let pattern = self.pattern.load();
        self.primary(pattern).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let pattern = self.pattern.load();

        let affected = self.primary(pattern).execute(sql, params).await?;
        self.stats.record_write(pattern.src_is_primary());

        if let Some(mirror) = self.secondary(pattern) {
            match mirror.execute(sql, params).await {
                Ok(_) => self.stats.record_write(!pattern.src_is_primary()),
                Err(e) => {
                    error!(
                        error = %e,
                        sql = %sql,
                        pattern = %pattern,
                        "mirrored write failed; primary result stands"
                    );
                    self.stats.record_mirror_failure();
                }
            }
        }

        Ok(affected)
    }

    /// Prepared statements are not supported: a prepared handle would pin
    /// one store while the pattern moves underneath it
    async fn prepare(&self, _sql: &str) -> Result<Box<dyn PreparedStatement>> {
        Err(Error::unsupported(
            "prepared statements are not supported on a dual-write pool",
        ))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.begin_tx(None).await
    }

    async fn begin_with_isolation(
        &self,
        level: IsolationLevel,
    ) -> Result<Box<dyn Transaction>> {
        self.begin_tx(Some(level)).await
    }

    async fn is_valid(&self) -> bool {
        let pattern = self.pattern.load();
        self.primary(pattern).is_valid().await
    }

    async fn close(&self) -> Result<()> {
        let src_result = self.src.close().await;
        let dst_result = self.dst.close().await;
        src_result?;
        dst_result
    }
}

/// Transaction produced by [`DualWritePool::begin`]
///
/// The pattern is captured at `begin`; a pattern switch mid-flight does not
/// affect this transaction.
pub struct DualWriteTransaction {
    primary: Box<dyn Transaction>,
    secondary: Option<Box<dyn Transaction>>,
    pattern: WritePattern,
    stats: Arc<AtomicPoolStats>,
}

impl DualWriteTransaction {
    /// The pattern this transaction was begun under
    pub fn pattern(&self) -> WritePattern {
        self.pattern
    }
}

#[async_trait]
impl Transaction for DualWriteTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.primary.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let affected = self.primary.execute(sql, params).await?;
        self.stats.record_write(self.pattern.src_is_primary());

        if let Some(mirror) = &self.secondary {
            match mirror.execute(sql, params).await {
                Ok(_) => self.stats.record_write(!self.pattern.src_is_primary()),
                Err(e) => {
                    error!(
                        error = %e,
                        sql = %sql,
                        pattern = %self.pattern,
                        "mirrored transactional write failed; primary result stands"
                    );
                    self.stats.record_mirror_failure();
                }
            }
        }

        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;

        if let Err(e) = this.primary.commit().await {
            if let Some(mirror) = this.secondary {
                if let Err(rb) = mirror.rollback().await {
                    error!(error = %rb, "mirrored transaction rollback failed");
                }
            }
            return Err(e);
        }

        if let Some(mirror) = this.secondary {
            if let Err(e) = mirror.commit().await {
                error!(
                    error = %e,
                    pattern = %this.pattern,
                    "mirrored transaction commit failed; primary commit stands"
                );
                this.stats.record_mirror_failure();
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;

        let primary_result = this.primary.rollback().await;
        if let Some(mirror) = this.secondary {
            if let Err(e) = mirror.rollback().await {
                error!(error = %e, "mirrored transaction rollback failed");
            }
        }
        primary_result
    }

    async fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.primary.set_isolation_level(level).await?;
        if let Some(mirror) = &self.secondary {
            if let Err(e) = mirror.set_isolation_level(level).await {
                error!(error = %e, "mirrored isolation change failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_names_round_trip() {
        for pattern in [
            WritePattern::SrcOnly,
            WritePattern::SrcFirst,
            WritePattern::DstFirst,
            WritePattern::DstOnly,
        ] {
            assert_eq!(pattern.as_str().parse::<WritePattern>().unwrap(), pattern);
        }
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        let err = "both_first".parse::<WritePattern>().unwrap_err();
        assert!(err.to_string().contains("unknown write pattern"));
    }

    #[test]
    fn test_pattern_helpers() {
        assert!(WritePattern::SrcOnly.src_is_primary());
        assert!(WritePattern::SrcFirst.src_is_primary());
        assert!(!WritePattern::DstFirst.src_is_primary());
        assert!(!WritePattern::DstOnly.src_is_primary());

        assert!(WritePattern::SrcOnly.is_single());
        assert!(WritePattern::DstOnly.is_single());
        assert!(!WritePattern::SrcFirst.is_single());
        assert!(!WritePattern::DstFirst.is_single());
    }

    #[test]
    fn test_pattern_cell_swap() {
        let cell = PatternCell::new(WritePattern::SrcOnly);
        assert_eq!(cell.load(), WritePattern::SrcOnly);
        cell.store(WritePattern::DstFirst);
        assert_eq!(cell.load(), WritePattern::DstFirst);
    }
}
