//! Integration tests for master election
//!
//! These tests verify that:
//! - Simultaneous acquisition yields exactly one master
//! - A master that cannot renew demotes within one election round
//! - Another replica takes over once the stale lock expires
//! - Replicas in separate stores (SQLite file) elect through the shared file

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use telemetry_porter::{
    collector::{MasterElector, Porter, shutdown_channel},
    store::{LockStore, MemoryLockStore},
};

use crate::helpers::{
    CountingAnalyzer, FlakyStore, fast_config, memory_porter, spawn_porter, wait_until,
};
use telemetry_porter::broker::MemoryBroker;

const KEY: &str = "it:race:masterlock";

#[tokio::test]
async fn test_simultaneous_acquire_has_one_winner() {
    let store = Arc::new(MemoryLockStore::new());
    let electors: Vec<_> = (0..8)
        .map(|i| {
            Arc::new(MasterElector::new(
                store.clone(),
                KEY,
                format!("replica-{i}"),
                Duration::from_secs(30),
            ))
        })
        .collect();

    let results = join_all(electors.iter().map(|e| {
        let e = e.clone();
        tokio::spawn(async move { e.try_acquire_or_renew().await })
    }))
    .await;

    let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_renewal_failure_demotes_and_other_takes_over() {
    let shared = Arc::new(MemoryLockStore::new());
    let store_a = Arc::new(FlakyStore::new(shared.clone()));
    let ttl = Duration::from_millis(200);

    let a = MasterElector::new(store_a.clone(), KEY, "a", ttl);
    let b = MasterElector::new(shared.clone(), KEY, "b", ttl);

    assert!(a.try_acquire_or_renew().await);
    assert!(!b.try_acquire_or_renew().await);

    store_a.set_failing(true);
    assert!(!a.try_acquire_or_renew().await);
    assert!(!a.is_master());

    // the stale lock still blocks b until it expires
    assert!(!b.try_acquire_or_renew().await);
    tokio::time::sleep(ttl + Duration::from_millis(50)).await;
    assert!(b.try_acquire_or_renew().await);

    // a never regains mastership through its old identifier
    store_a.set_failing(false);
    assert!(!a.try_acquire_or_renew().await);
    assert_eq!(shared.get(KEY).await.unwrap().as_deref(), Some("b"));
}

#[tokio::test]
async fn test_porters_fail_over_on_shutdown() {
    let store = Arc::new(MemoryLockStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let config = fast_config("failover", &["failover_0"]);

    let (trigger_a, shutdown_a) = shutdown_channel();
    let (trigger_b, shutdown_b) = shutdown_channel();
    let a = memory_porter(
        config.clone(),
        store.clone(),
        broker.clone(),
        Arc::new(CountingAnalyzer::default()),
        shutdown_a,
        "a",
    );
    let run_a = spawn_porter(&a);
    wait_until(Duration::from_secs(2), || a.stats().is_master).await;

    let b = memory_porter(
        config,
        store.clone(),
        broker.clone(),
        Arc::new(CountingAnalyzer::default()),
        shutdown_b,
        "b",
    );
    let run_b = spawn_porter(&b);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!b.stats().is_master);

    trigger_a.trigger();
    run_a.await.unwrap().unwrap();

    wait_until(Duration::from_secs(2), || b.stats().is_master).await;
    wait_until(Duration::from_secs(2), || {
        broker.subscriber_count("failover_0") == 1
    })
    .await;

    trigger_b.trigger();
    run_b.await.unwrap().unwrap();
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_store_shared_between_stores() {
    use telemetry_porter::store::sqlite::SqliteLockStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lock.db");
    let store_a = Arc::new(SqliteLockStore::new(&path).await.unwrap());
    let store_b = Arc::new(SqliteLockStore::new(&path).await.unwrap());
    let ttl = Duration::from_millis(300);

    let a = MasterElector::new(store_a, KEY, "a", ttl);
    let b = MasterElector::new(store_b, KEY, "b", ttl);

    assert!(a.try_acquire_or_renew().await);
    assert!(!b.try_acquire_or_renew().await);

    a.resign().await;
    assert!(b.try_acquire_or_renew().await);
    assert!(!a.try_acquire_or_renew().await);
}
