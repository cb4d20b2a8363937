//! Backfill and matching against in-memory chains
//!
//! Run with: cargo test --test backfill_test

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use sqlx::SqlitePool;
use tokio::sync::watch;

use bridge_reconciler::db::{self, create_memory_pool};
use bridge_reconciler::error::ScanError;
use bridge_reconciler::types::DepositEventKind;
use bridge_reconciler::watchers::{BackfillWatcher, WatcherManager};

use common::*;

const L1: DepositEventKind = DepositEventKind::EthDepositInitiated;
const L2: DepositEventKind = DepositEventKind::DepositFinalized;

fn l1_watcher(source: Arc<MockEventSource>, db: SqlitePool, chunk_size: u64) -> BackfillWatcher {
    BackfillWatcher::new(source, db, L1, L1_BRIDGE, chunk_size)
}

fn l2_watcher(source: Arc<MockEventSource>, db: SqlitePool, chunk_size: u64) -> BackfillWatcher {
    BackfillWatcher::new(source, db, L2, L2_BRIDGE, chunk_size)
}

/// A receiver whose value stays `false`
fn no_shutdown() -> watch::Receiver<bool> {
    watch::channel(false).1
}

async fn pointer(db: &SqlitePool, name: &str) -> (Option<i64>, Option<i64>) {
    let p = db::get_block_pointer(db, name)
        .await
        .unwrap()
        .expect("pointer should exist");
    (p.block_number, p.block_time)
}

fn three_l1_deposits() -> Vec<bridge_reconciler::types::RawLog> {
    vec![
        l1_deposit_log(100, 0, sender(1), eth(1)),
        l1_deposit_log(12_000, 0, sender(2), eth(2)),
        l1_deposit_log(24_999, 3, sender(3), eth(3)),
    ]
}

#[tokio::test]
async fn test_full_backfill_walks_to_genesis() {
    let db = create_memory_pool().await.unwrap();
    let source = Arc::new(
        MockEventSource::new(25_000, 1_600_000_000, 12).with_logs(three_l1_deposits()),
    );

    let summary = l1_watcher(source.clone(), db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.chunks_processed, 3);
    assert_eq!(summary.events_inserted, 3);
    assert_eq!(summary.matches, 0);
    assert_eq!(summary.final_cursor, 0);
    assert!(!summary.cancelled);

    assert_eq!(
        source.requested(),
        vec![(15_000, 24_999), (5_000, 14_999), (0, 4_999)]
    );

    assert_eq!(
        pointer(&db, &L1.lowest_pointer_name()).await,
        (Some(0), Some(source.time_of(0) as i64))
    );
    assert_eq!(
        pointer(&db, &L1.last_pointer_name()).await,
        (Some(24_999), Some(source.time_of(24_999) as i64))
    );
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 3);
}

#[tokio::test]
async fn test_chunks_are_contiguous_and_descending() {
    let db = create_memory_pool().await.unwrap();
    let source = Arc::new(MockEventSource::new(1_234, 0, 2));

    l2_watcher(source.clone(), db, 100)
        .run(no_shutdown())
        .await
        .unwrap();

    let ranges = source.requested();
    assert_eq!(ranges.first(), Some(&(1_134, 1_233)));
    assert_eq!(ranges.last(), Some(&(0, 33)));
    for pair in ranges.windows(2) {
        assert_eq!(pair[1].1 + 1, pair[0].0);
    }
}

#[tokio::test]
async fn test_empty_chunks_still_advance_pointers() {
    let db = create_memory_pool().await.unwrap();
    let source = Arc::new(MockEventSource::new(10, 500, 12));

    let summary = l1_watcher(source.clone(), db.clone(), 4)
        .run(no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.chunks_processed, 3);
    assert_eq!(summary.events_inserted, 0);
    assert_eq!(source.requested(), vec![(6, 9), (2, 5), (0, 1)]);
    assert_eq!(pointer(&db, &L1.lowest_pointer_name()).await, (Some(0), Some(500)));
    assert_eq!(
        pointer(&db, &L1.last_pointer_name()).await,
        (Some(9), Some(500 + 9 * 12))
    );
}

#[tokio::test]
async fn test_resume_after_completion_is_a_no_op() {
    let db = create_memory_pool().await.unwrap();
    let source = Arc::new(
        MockEventSource::new(25_000, 1_600_000_000, 12).with_logs(three_l1_deposits()),
    );
    l1_watcher(source, db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();

    // Chain moved on; the stored pointer wins over the new head
    let restarted = Arc::new(
        MockEventSource::new(40_000, 1_600_000_000, 12).with_logs(three_l1_deposits()),
    );
    let summary = l1_watcher(restarted.clone(), db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.chunks_processed, 0);
    assert_eq!(summary.events_inserted, 0);
    assert!(restarted.requested().is_empty());
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 3);
    assert_eq!(pointer(&db, &L1.last_pointer_name()).await.0, Some(24_999));
}

#[tokio::test]
async fn test_rpc_failure_keeps_last_committed_chunk() {
    let db = create_memory_pool().await.unwrap();
    let source = Arc::new(
        MockEventSource::new(25_000, 1_600_000_000, 12)
            .with_logs(three_l1_deposits())
            .failing_at(12_000),
    );

    let err = l1_watcher(source.clone(), db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Adapter(_)));
    assert_eq!(err.kind(), "rpc");

    assert_eq!(pointer(&db, &L1.lowest_pointer_name()).await.0, Some(15_000));
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 1);

    source.clear_failure();
    let summary = l1_watcher(source.clone(), db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();

    assert_eq!(summary.chunks_processed, 2);
    assert_eq!(summary.events_inserted, 2);
    assert_eq!(summary.final_cursor, 0);
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 3);
    assert_eq!(pointer(&db, &L1.last_pointer_name()).await.0, Some(24_999));
}

#[tokio::test]
async fn test_parse_failure_rolls_back_the_chunk() {
    let db = create_memory_pool().await.unwrap();
    let source = Arc::new(MockEventSource::new(25_000, 1_600_000_000, 12).with_logs(vec![
        l1_deposit_log(12_000, 0, sender(1), eth(1)),
        malformed_l1_log(12_000, 1),
        l1_deposit_log(24_999, 0, sender(2), eth(2)),
    ]));

    let err = l1_watcher(source, db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap_err();

    match err {
        ScanError::Parse {
            block_number,
            log_index,
            ..
        } => {
            assert_eq!(block_number, 12_000);
            assert_eq!(log_index, 1);
        }
        other => panic!("expected parse error, got {:?}", other),
    }

    // Only the first chunk is committed; the valid log next to the bad one is not stored
    assert_eq!(pointer(&db, &L1.lowest_pointer_name()).await.0, Some(15_000));
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_l2_scan_links_earlier_l1_deposit() {
    let db = create_memory_pool().await.unwrap();
    // L1 block 500 at t=1000, L2 block 1010 at t=1010
    let l1 = Arc::new(
        MockEventSource::new(1_000, 0, 2).with_logs(vec![l1_deposit_log(500, 0, sender(7), eth(5))]),
    );
    let l2 = Arc::new(
        MockEventSource::new(2_000, 0, 1)
            .with_logs(vec![l2_finalized_log(1_010, 0, sender(7), eth(5))]),
    );

    let l1_summary = l1_watcher(l1, db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();
    assert_eq!(l1_summary.matches, 0);

    let l2_summary = l2_watcher(l2, db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();
    assert_eq!(l2_summary.matches, 1);

    let matched = db::get_matched_deposits(&db, 10, 0).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].time_diff_seconds, 10);
    assert_eq!(matched[0].l1_timestamp, 1_000);
    assert_eq!(matched[0].l2_timestamp, 1_010);
    assert_eq!(db::count_unmatched_deposits(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_matching_does_not_depend_on_scan_order() {
    let db = create_memory_pool().await.unwrap();
    let l1 = Arc::new(
        MockEventSource::new(1_000, 0, 2).with_logs(vec![l1_deposit_log(500, 0, sender(7), eth(5))]),
    );
    let l2 = Arc::new(
        MockEventSource::new(2_000, 0, 1)
            .with_logs(vec![l2_finalized_log(1_010, 0, sender(7), eth(5))]),
    );

    let l2_summary = l2_watcher(l2, db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();
    assert_eq!(l2_summary.matches, 0);

    let l1_summary = l1_watcher(l1, db.clone(), 10_000)
        .run(no_shutdown())
        .await
        .unwrap();
    assert_eq!(l1_summary.matches, 1);

    let matched = db::get_matched_deposits(&db, 10, 0).await.unwrap();
    assert_eq!(matched[0].time_diff_seconds, 10);
}

#[tokio::test]
async fn test_l2_before_l1_is_not_matched() {
    let db = create_memory_pool().await.unwrap();
    let l1 = Arc::new(
        MockEventSource::new(1_000, 0, 2).with_logs(vec![l1_deposit_log(500, 0, sender(7), eth(5))]),
    );
    let l2 = Arc::new(
        MockEventSource::new(2_000, 0, 1)
            .with_logs(vec![l2_finalized_log(990, 0, sender(7), eth(5))]),
    );

    l1_watcher(l1, db.clone(), 10_000).run(no_shutdown()).await.unwrap();
    let summary = l2_watcher(l2, db.clone(), 10_000).run(no_shutdown()).await.unwrap();

    assert_eq!(summary.matches, 0);
    assert_eq!(db::count_matched_deposits(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancellation_stops_between_chunks() {
    let db = create_memory_pool().await.unwrap();
    let (tx, rx) = watch::channel(false);
    let source = Arc::new(
        MockEventSource::new(25_000, 1_600_000_000, 12)
            .with_logs(three_l1_deposits())
            .shutdown_after_first_fetch(tx),
    );

    let summary = l1_watcher(source.clone(), db.clone(), 10_000)
        .run(rx)
        .await
        .unwrap();

    // The chunk in flight when shutdown was requested still commits
    assert!(summary.cancelled);
    assert_eq!(summary.chunks_processed, 1);
    assert_eq!(summary.final_cursor, 15_000);
    assert_eq!(source.requested().len(), 1);
    assert_eq!(pointer(&db, &L1.lowest_pointer_name()).await.0, Some(15_000));
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 1);
}

/// Links are symmetric, one-to-one and never run backwards in time
async fn assert_links_consistent(db: &SqlitePool) {
    let count = |sql: &'static str| {
        let db = db.clone();
        async move { sqlx::query_scalar::<_, i64>(sql).fetch_one(&db).await.unwrap() }
    };

    assert_eq!(
        count(
            "SELECT COUNT(*) FROM l1_eth_deposits_initiated l1
             LEFT JOIN l2_deposits_finalized l2 ON l1.matched_l2_id = l2.id
             WHERE l1.matched_l2_id IS NOT NULL AND (l2.id IS NULL OR l2.matched_l1_id != l1.id)"
        )
        .await,
        0,
        "L1 rows pointing at an L2 row that does not point back"
    );
    assert_eq!(
        count(
            "SELECT COUNT(*) FROM l2_deposits_finalized l2
             LEFT JOIN l1_eth_deposits_initiated l1 ON l2.matched_l1_id = l1.id
             WHERE l2.matched_l1_id IS NOT NULL AND (l1.id IS NULL OR l1.matched_l2_id != l2.id)"
        )
        .await,
        0,
        "L2 rows pointing at an L1 row that does not point back"
    );
    assert_eq!(
        count(
            "SELECT COUNT(*) - COUNT(DISTINCT matched_l2_id) FROM l1_eth_deposits_initiated
             WHERE matched_l2_id IS NOT NULL"
        )
        .await,
        0,
        "L2 row linked from more than one L1 row"
    );
    assert_eq!(
        count(
            "SELECT COUNT(*) - COUNT(DISTINCT matched_l1_id) FROM l2_deposits_finalized
             WHERE matched_l1_id IS NOT NULL"
        )
        .await,
        0,
        "L1 row linked from more than one L2 row"
    );
    assert_eq!(
        count(
            "SELECT COUNT(*) FROM l1_eth_deposits_initiated l1
             JOIN l2_deposits_finalized l2 ON l1.matched_l2_id = l2.id
             WHERE l2.block_timestamp < l1.block_timestamp"
        )
        .await,
        0,
        "finalization linked before its initiation"
    );
}

#[tokio::test]
async fn test_concurrent_scans_produce_one_to_one_links() {
    let db = create_memory_pool().await.unwrap();

    let mut l1_logs = Vec::new();
    let mut l2_logs = Vec::new();
    for i in 1..=20u64 {
        // L1: 12s blocks, L2: 2s blocks, finalization about a minute later
        let l1_block = 100 * i + 50;
        let l2_block = 6 * l1_block + 30;
        l1_logs.push(l1_deposit_log(l1_block, 0, sender(i as u8), eth(i)));
        l2_logs.push(l2_finalized_log(l2_block, 0, sender(i as u8), eth(i)));
    }
    // Two identical transfers from the same sender
    let repeat = Address::repeat_byte(0xaa);
    for l1_block in [3_000u64, 3_100] {
        l1_logs.push(l1_deposit_log(l1_block, 1, repeat, eth(1)));
        l2_logs.push(l2_finalized_log(6 * l1_block + 30, 1, repeat, eth(1)));
    }

    let l1 = Arc::new(MockEventSource::new(3_200, 1_000_000, 12).with_logs(l1_logs));
    let l2 = Arc::new(MockEventSource::new(19_000, 1_000_000, 2).with_logs(l2_logs));

    let manager = WatcherManager::from_watchers(vec![
        l1_watcher(l1, db.clone(), 500),
        l2_watcher(l2, db.clone(), 1_000),
    ]);
    let summaries = manager.run(no_shutdown()).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.final_cursor == 0));

    assert_links_consistent(&db).await;

    // Every distinct transfer found its counterpart
    let matched = db::count_matched_deposits(&db).await.unwrap();
    assert!(matched >= 20, "only {} pairs matched", matched);
    let total_matches: u64 = summaries.iter().map(|s| s.matches).sum();
    assert_eq!(total_matches as i64, matched);
}

#[tokio::test]
async fn test_manager_fails_fast() {
    let db = create_memory_pool().await.unwrap();

    let broken = Arc::new(MockEventSource::new(1_000, 0, 12).failing_head());
    // Would need many minutes to reach genesis
    let slow = Arc::new(
        MockEventSource::new(1_000_000, 0, 2).with_delay(Duration::from_millis(5)),
    );

    let manager = WatcherManager::from_watchers(vec![
        l1_watcher(broken, db.clone(), 10_000),
        l2_watcher(slow, db.clone(), 10),
    ]);

    let result = tokio::time::timeout(Duration::from_secs(30), manager.run(no_shutdown()))
        .await
        .expect("manager should stop on the first error");

    let err = result.unwrap_err();
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::Adapter(adapter)) => assert!(adapter.is_transient()),
        other => panic!("expected adapter error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_manager_shutdown_cancels_both_scans() {
    let db = create_memory_pool().await.unwrap();
    let (tx, rx) = watch::channel(false);

    let l1 = Arc::new(MockEventSource::new(50_000, 0, 12).shutdown_after_first_fetch(tx));
    let l2 = Arc::new(MockEventSource::new(1_000_000, 0, 2).with_delay(Duration::from_millis(5)));

    let manager = WatcherManager::from_watchers(vec![
        l1_watcher(l1, db.clone(), 1_000),
        l2_watcher(l2, db.clone(), 10),
    ]);

    let summaries = tokio::time::timeout(Duration::from_secs(30), manager.run(rx))
        .await
        .expect("shutdown should stop both watchers")
        .unwrap();

    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scans_on_shared_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("reconciler.db").display());
    let db = db::create_pool(&url).await.unwrap();
    db::run_migrations(&db).await.unwrap();

    // Identical transfers from one sender: every row shares one matching hash
    let repeat = Address::repeat_byte(0xbb);
    let mut l1_logs = Vec::new();
    let mut l2_logs = Vec::new();
    for i in 1..=400u64 {
        let l1_block = 10 * i;
        l1_logs.push(l1_deposit_log(l1_block, 0, repeat, eth(1)));
        l2_logs.push(l2_finalized_log(6 * l1_block + 30, 0, repeat, eth(1)));
    }

    let l1 = Arc::new(MockEventSource::new(4_010, 1_000_000, 12).with_logs(l1_logs));
    let l2 = Arc::new(MockEventSource::new(24_100, 1_000_000, 2).with_logs(l2_logs));

    let manager = WatcherManager::from_watchers(vec![
        l1_watcher(l1, db.clone(), 20),
        l2_watcher(l2, db.clone(), 60),
    ]);
    let summaries = tokio::time::timeout(Duration::from_secs(120), manager.run(no_shutdown()))
        .await
        .expect("both scans should finish")
        .unwrap();

    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.final_cursor == 0 && !s.cancelled));
    assert_eq!(db::count_deposits(&db, L1).await.unwrap(), 400);
    assert_eq!(db::count_deposits(&db, L2).await.unwrap(), 400);

    assert_links_consistent(&db).await;

    let matched = db::count_matched_deposits(&db).await.unwrap();
    assert!(matched > 0);
    let total_matches: u64 = summaries.iter().map(|s| s.matches).sum();
    assert_eq!(total_matches as i64, matched);

    db.close().await;
}
