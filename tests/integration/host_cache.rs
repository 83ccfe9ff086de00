//! Integration tests for the host cache and the snapshot analyzer
//!
//! These tests verify that:
//! - Hosts added after a build are resolved by point query, then by the next snapshot
//! - Readers keep getting answers while refreshes run concurrently
//! - Snapshot payloads flow through a porter into the snapshot sink

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use telemetry_porter::{
    analyzers::snapshot::SnapshotAnalyzer,
    broker::MemoryBroker,
    cache::{HostCache, HostRecord, MemoryHostSource},
    collector::{CollectorPorter, Porter, shutdown_channel},
    store::MemoryLockStore,
};

use crate::helpers::{fast_config, spawn_porter, wait_until};

fn hosts(count: i64) -> Vec<HostRecord> {
    (0..count)
        .map(|i| HostRecord::new(i, 0, format!("10.0.{}.{}", i / 256, i % 256)))
        .collect()
}

#[tokio::test]
async fn test_readers_not_blocked_by_refresh() {
    let source = Arc::new(MemoryHostSource::with_hosts(hosts(2_000)));
    let cache = Arc::new(
        HostCache::build(source.clone(), Duration::from_secs(600))
            .await
            .unwrap(),
    );

    let done = Arc::new(AtomicBool::new(false));
    let refresher = {
        let cache = cache.clone();
        let source = source.clone();
        let done = done.clone();
        tokio::spawn(async move {
            for i in 2_000..2_050 {
                source.insert_host(HostRecord::new(i, 0, format!("10.1.0.{}", i - 2_000)));
                cache.refresh().await.unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut reads = 0usize;
    while !done.load(Ordering::SeqCst) {
        // hosts from the initial build are visible in every generation
        assert_eq!(cache.get(0, "10.0.0.7").map(|h| h.host_id), Some(7));
        reads += 1;
        tokio::task::yield_now().await;
    }
    refresher.await.unwrap();

    assert!(reads > 0);
    assert_eq!(cache.len(), 2_050);
    assert_eq!(cache.generation(), 50);
}

#[tokio::test]
async fn test_snapshot_payloads_reach_sink() {
    let source = Arc::new(MemoryHostSource::with_hosts(vec![
        HostRecord::new(11, 0, "10.0.0.1"),
        HostRecord::new(12, 3, "10.0.0.2"),
    ]));
    let cache = Arc::new(
        HostCache::build(source.clone(), Duration::from_secs(600))
            .await
            .unwrap(),
    );

    let (trigger, shutdown) = shutdown_channel();
    let porter = Arc::new(
        CollectorPorter::new(
            fast_config("snapshot", &["snapshot_0"]),
            Arc::new(MemoryLockStore::new()),
            Arc::new(MemoryBroker::new()),
            Arc::new(SnapshotAnalyzer::new(cache.clone(), source.clone())),
            shutdown,
        )
        .with_host_cache(cache),
    );
    let run = spawn_porter(&porter);

    porter
        .mock(r#"{"cloudid": 0, "ip": "10.0.0.1", "data": {"cpu": 12}}"#.to_string())
        .unwrap();
    porter
        .mock(r#"{"cloudid": "3", "ip": "172.16.0.9,10.0.0.2", "data": {"cpu": 40}}"#.to_string())
        .unwrap();
    porter
        .mock(r#"{"cloudid": 0, "ip": "10.9.9.9", "data": {}}"#.to_string())
        .unwrap();

    wait_until(Duration::from_secs(2), || {
        let stats = porter.stats();
        stats.analyzed_ok == 2 && stats.analyzed_err == 1
    })
    .await;

    assert_eq!(source.snapshot(11).unwrap().payload["cpu"], 12);
    assert_eq!(source.snapshot(12).unwrap().payload["cpu"], 40);

    trigger.trigger();
    run.await.unwrap().unwrap();
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_hosts_visible_after_refresh() {
    use telemetry_porter::cache::sqlite::SqliteHostSource;

    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(SqliteHostSource::new(dir.path().join("cmdb.db")).await.unwrap());
    source
        .upsert_host(&HostRecord::new(1, 0, "10.0.0.1"))
        .await
        .unwrap();

    let cache = HostCache::build(source.clone(), Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(cache.len(), 1);

    source
        .upsert_host(&HostRecord::new(2, 0, "10.0.0.2"))
        .await
        .unwrap();

    // not in the snapshot yet, but a point query finds it
    assert_eq!(cache.get(0, "10.0.0.2"), None);
    let found = cache.resolve(0, "10.0.0.2").await.unwrap();
    assert_eq!(found.map(|h| h.host_id), Some(2));

    assert_eq!(cache.refresh().await.unwrap(), 2);
    assert_eq!(cache.snapshot().len(), 2);
    assert_eq!(cache.get(0, "10.0.0.2").map(|h| h.host_id), Some(2));
}
