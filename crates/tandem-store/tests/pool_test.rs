//! Integration tests for the dual-write pool: routing, mirroring and
//! transaction semantics across every write pattern.

use std::sync::Arc;

use tandem_store::prelude::*;
use tandem_store::testing::StubConnection;

fn pool_with(pattern: WritePattern) -> (StubConnection, StubConnection, DualWritePool) {
    let src = StubConnection::new("src");
    let dst = StubConnection::new("dst");
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        pattern,
    );
    (src, dst, pool)
}

// ===========================================================================
// Write routing
// ===========================================================================

#[tokio::test]
async fn test_src_only_writes_src_alone() {
    let (src, dst, pool) = pool_with(WritePattern::SrcOnly);

    pool.execute("UPDATE t SET x = $1", &[Value::Int64(1)])
        .await
        .unwrap();

    assert_eq!(src.execute_count(), 1);
    assert_eq!(dst.execute_count(), 0);
}

#[tokio::test]
async fn test_dst_only_writes_dst_alone() {
    let (src, dst, pool) = pool_with(WritePattern::DstOnly);

    pool.execute("UPDATE t SET x = $1", &[Value::Int64(1)])
        .await
        .unwrap();

    assert_eq!(src.execute_count(), 0);
    assert_eq!(dst.execute_count(), 1);
}

#[tokio::test]
async fn test_src_first_mirrors_to_dst() {
    let (src, dst, pool) = pool_with(WritePattern::SrcFirst);

    pool.execute("UPDATE t SET x = $1", &[Value::Int64(7)])
        .await
        .unwrap();

    assert_eq!(src.execute_count(), 1);
    assert_eq!(dst.execute_count(), 1);
    // Same statement and parameters on both sides
    assert_eq!(src.executed(), dst.executed());

    let stats = pool.stats();
    assert_eq!(stats.writes_src, 1);
    assert_eq!(stats.writes_dst, 1);
    assert_eq!(stats.mirror_failures, 0);
}

#[tokio::test]
async fn test_dst_first_mirrors_to_src() {
    let (src, dst, pool) = pool_with(WritePattern::DstFirst);

    pool.execute("DELETE FROM t WHERE id = $1", &[Value::Int64(3)])
        .await
        .unwrap();

    assert_eq!(dst.execute_count(), 1);
    assert_eq!(src.execute_count(), 1);
}

#[tokio::test]
async fn test_mirror_failure_does_not_fail_the_write() {
    let src = StubConnection::new("src");
    let dst = StubConnection::new("dst").fail_executes_with("disk full");
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        WritePattern::SrcFirst,
    );

    let affected = pool.execute("UPDATE t SET x = 1", &[]).await.unwrap();

    assert_eq!(affected, 1);
    assert_eq!(src.execute_count(), 1);
    assert_eq!(pool.stats().mirror_failures, 1);
    assert_eq!(pool.stats().writes_dst, 0);
}

#[tokio::test]
async fn test_primary_failure_is_fatal_and_skips_mirror() {
    let src = StubConnection::new("src").fail_executes_with("constraint violated");
    let dst = StubConnection::new("dst");
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        WritePattern::SrcFirst,
    );

    let err = pool.execute("UPDATE t SET x = 1", &[]).await.unwrap_err();

    assert!(err.to_string().contains("constraint violated"));
    // The mirror never ran: the primary is the source of truth
    assert_eq!(dst.execute_count(), 0);
    assert_eq!(pool.stats().writes_src, 0);
}

// ===========================================================================
// Read routing
// ===========================================================================

#[tokio::test]
async fn test_reads_route_to_primary_only() {
    let (src, dst, pool) = pool_with(WritePattern::SrcFirst);

    pool.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(src.query_count(), 1);
    assert_eq!(dst.query_count(), 0);

    pool.update_pattern(WritePattern::DstFirst);
    pool.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(src.query_count(), 1);
    assert_eq!(dst.query_count(), 1);
}

#[tokio::test]
async fn test_query_one_follows_the_pattern() {
    let row = Row::new(vec!["n".into()], vec![Value::Int64(42)]);
    let src = StubConnection::new("src");
    let dst = StubConnection::new("dst").with_rows(vec![row.clone()]);
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        WritePattern::DstOnly,
    );

    let got = pool.query_one("SELECT n FROM t", &[]).await.unwrap();
    assert_eq!(got, Some(row));
    assert_eq!(src.query_count(), 0);
}

// ===========================================================================
// Pattern switching
// ===========================================================================

#[tokio::test]
async fn test_pattern_switch_takes_effect_immediately() {
    let (src, dst, pool) = pool_with(WritePattern::SrcOnly);

    pool.execute("UPDATE t SET x = 1", &[]).await.unwrap();
    pool.update_pattern(WritePattern::DstOnly);
    pool.execute("UPDATE t SET x = 2", &[]).await.unwrap();

    assert_eq!(src.execute_count(), 1);
    assert_eq!(dst.execute_count(), 1);
    assert_eq!(pool.pattern(), WritePattern::DstOnly);
}

#[tokio::test]
async fn test_prepare_is_unsupported() {
    let (src, dst, pool) = pool_with(WritePattern::SrcFirst);

    let err = match pool.prepare("SELECT 1").await {
        Ok(_) => panic!("prepare must fail on a dual-write pool"),
        Err(err) => err,
    };
    assert_eq!(err.category(), ErrorCategory::Other);
    assert_eq!(src.query_count() + dst.query_count(), 0);
}

// ===========================================================================
// Transactions
// ===========================================================================

#[tokio::test]
async fn test_transaction_mirrors_writes_and_commits_both() {
    let (src, dst, pool) = pool_with(WritePattern::SrcFirst);

    let tx = pool.begin().await.unwrap();
    tx.execute("INSERT INTO t VALUES ($1)", &[Value::Int64(1)])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(src.tx_executed().len(), 1);
    assert_eq!(dst.tx_executed().len(), 1);
    assert_eq!(src.committed(), 1);
    assert_eq!(dst.committed(), 1);
    assert_eq!(pool.stats().transactions, 1);
}

#[tokio::test]
async fn test_single_store_transaction_touches_one_side() {
    let (src, dst, pool) = pool_with(WritePattern::DstOnly);

    let tx = pool.begin().await.unwrap();
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(src.begun(), 0);
    assert_eq!(dst.begun(), 1);
    assert_eq!(dst.committed(), 1);
}

#[tokio::test]
async fn test_secondary_commit_failure_keeps_primary_commit() {
    let src = StubConnection::new("src");
    let dst = StubConnection::new("dst").fail_commit_with("server gone");
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        WritePattern::SrcFirst,
    );

    let tx = pool.begin().await.unwrap();
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(src.committed(), 1);
    assert_eq!(dst.committed(), 0);
    assert_eq!(pool.stats().mirror_failures, 1);
}

#[tokio::test]
async fn test_primary_commit_failure_propagates_and_rolls_back_mirror() {
    let src = StubConnection::new("src").fail_commit_with("deadlock");
    let dst = StubConnection::new("dst");
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        WritePattern::SrcFirst,
    );

    let tx = pool.begin().await.unwrap();
    let err = tx.commit().await.unwrap_err();

    assert!(err.to_string().contains("deadlock"));
    assert_eq!(src.committed(), 0);
    assert_eq!(dst.committed(), 0);
    assert_eq!(dst.rolled_back(), 1);
}

#[tokio::test]
async fn test_begin_secondary_failure_continues_primary_only() {
    let src = StubConnection::new("src");
    let dst = StubConnection::new("dst").fail_begin_with("too many connections");
    let pool = DualWritePool::with_pattern(
        Arc::new(src.clone()),
        Arc::new(dst.clone()),
        WritePattern::SrcFirst,
    );

    let tx = pool.begin().await.unwrap();
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(src.committed(), 1);
    assert_eq!(dst.begun(), 0);
    assert_eq!(dst.tx_executed().len(), 0);
    assert_eq!(pool.stats().mirror_failures, 1);
}

#[tokio::test]
async fn test_transaction_keeps_pattern_captured_at_begin() {
    let (src, dst, pool) = pool_with(WritePattern::SrcFirst);

    let tx = pool.begin().await.unwrap();
    pool.update_pattern(WritePattern::DstOnly);

    // The transaction still mirrors src -> dst
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(src.tx_executed().len(), 1);
    assert_eq!(dst.tx_executed().len(), 1);
    assert_eq!(src.committed(), 1);

    // New work outside the transaction follows the new pattern
    pool.execute("UPDATE t SET x = 1", &[]).await.unwrap();
    assert_eq!(src.execute_count(), 0);
    assert_eq!(dst.execute_count(), 1);
}

#[tokio::test]
async fn test_rollback_reaches_both_sides() {
    let (src, dst, pool) = pool_with(WritePattern::DstFirst);

    let tx = pool.begin().await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(src.rolled_back(), 1);
    assert_eq!(dst.rolled_back(), 1);
}

#[tokio::test]
async fn test_stats_accumulate_across_operations() {
    let (_, dst, pool) = pool_with(WritePattern::SrcFirst);

    pool.execute("UPDATE t SET x = 1", &[]).await.unwrap();
    pool.execute("UPDATE t SET x = 2", &[]).await.unwrap();
    let tx = pool.begin().await.unwrap();
    tx.commit().await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.writes_src, 2);
    assert_eq!(stats.writes_dst, 2);
    assert_eq!(stats.transactions, 1);
    assert_eq!(dst.execute_count(), 2);
}
