//! Integration tests for dispatch backpressure
//!
//! These tests verify that:
//! - Under sustained overload every payload is analyzed, evicted or
//!   overflowed, and nothing disappears silently
//! - Overflowed payloads land in the lock store list
//! - Payloads published to the broker all reach the analyzer when there is room
//! - A session flooded while both queues are saturated still notices a lock
//!   takeover and a shutdown within the receive timeout

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use telemetry_porter::{
    broker::MemoryBroker,
    collector::{
        ChannelSubscriber, DispatchQueue, MasterElector, OverflowPusher, OverflowQueue, Porter,
        PorterCounters, SessionEnd, Spill, WorkerPool, shutdown_channel,
    },
    store::{LockStore, MemoryLockStore},
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::helpers::{CountingAnalyzer, fast_config, memory_porter, spawn_porter, wait_until};

const TOTAL: usize = 10_000;

#[tokio::test]
async fn test_overload_conserves_every_message() {
    let store = Arc::new(MemoryLockStore::new());
    let counters = Arc::new(PorterCounters::new());
    let dispatch = Arc::new(DispatchQueue::new(100));
    let (overflow, pusher) = OverflowQueue::new(
        store.clone(),
        "it:load:queue",
        50,
        usize::MAX,
        Duration::from_millis(10),
    );
    let spill = Spill::new(
        "load",
        dispatch.clone(),
        Arc::new(overflow),
        counters.clone(),
        20,
    );

    let analyzer = Arc::new(CountingAnalyzer::slow(Duration::from_millis(1)));
    let pool = Arc::new(WorkerPool::new(
        "load",
        1,
        dispatch.clone(),
        analyzer.clone(),
        counters.clone(),
    ));
    let (trigger, shutdown) = shutdown_channel();
    let workers = pool.spawn(Duration::from_millis(10), &shutdown);
    let pusher_task = tokio::spawn(pusher.run(shutdown.clone()));

    for i in 0..TOTAL {
        spill.offer(format!("message-{i}"));
        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }

    wait_until(Duration::from_secs(10), || dispatch.is_empty()).await;
    // nothing is offered anymore, so the counters are final
    let get = PorterCounters::get;

    let handed = get(&counters.handed) as usize;
    let evicted = get(&counters.evicted) as usize;
    let overflowed = get(&counters.overflowed) as usize;

    assert_eq!(handed + evicted + overflowed, TOTAL);
    assert!(evicted + overflowed > 0);
    assert_eq!(get(&counters.dispatched) as usize + overflowed, TOTAL);

    trigger.trigger();
    pusher_task.await.unwrap();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(analyzer.seen(), handed);
    assert_eq!(store.list_len("it:load:queue").await.unwrap(), overflowed);
}

#[tokio::test]
async fn test_published_payloads_reach_analyzer() {
    let store = Arc::new(MemoryLockStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let analyzer = Arc::new(CountingAnalyzer::default());
    let (trigger, shutdown) = shutdown_channel();

    let porter = memory_porter(
        fast_config("publish", &["publish_0", "publish_1"]),
        store,
        broker.clone(),
        analyzer.clone(),
        shutdown,
        "solo",
    );
    let run = spawn_porter(&porter);

    wait_until(Duration::from_secs(2), || {
        broker.subscriber_count("publish_0") == 1 && broker.subscriber_count("publish_1") == 1
    })
    .await;

    for i in 0..200 {
        broker.publish(&format!("publish_{}", i % 2), format!("{{\"n\": {i}}}"));
    }

    wait_until(Duration::from_secs(5), || analyzer.seen() == 200).await;
    let stats = porter.stats();
    assert_eq!(stats.received, 200);
    assert_eq!(stats.evicted, 0);
    assert!(stats.last_message_at.is_some());

    trigger.trigger();
    run.await.unwrap().unwrap();
}

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
const MARGIN: Duration = Duration::from_millis(400);

struct Flooded {
    subscriber: Arc<ChannelSubscriber>,
    elector: Arc<MasterElector>,
    dispatch: Arc<DispatchQueue>,
    counters: Arc<PorterCounters>,
    // held but never run, so the overflow buffer stays full
    _pusher: OverflowPusher,
}

fn flooded_session(store: Arc<MemoryLockStore>, broker: Arc<MemoryBroker>) -> Flooded {
    let counters = Arc::new(PorterCounters::new());
    let dispatch = Arc::new(DispatchQueue::new(2));
    let (overflow, pusher) = OverflowQueue::new(
        store.clone(),
        "it:flood:queue",
        1,
        usize::MAX,
        Duration::from_millis(10),
    );
    let spill = Arc::new(Spill::new(
        "flood",
        dispatch.clone(),
        Arc::new(overflow),
        counters.clone(),
        1,
    ));
    let elector = Arc::new(MasterElector::new(
        store,
        "it:flood:masterlock",
        "me",
        Duration::from_secs(30),
    ));
    let subscriber = Arc::new(ChannelSubscriber::new(
        "flood",
        vec!["flood_0".to_string()],
        broker,
        elector.clone(),
        spill,
        counters.clone(),
        RECEIVE_TIMEOUT,
        RECEIVE_TIMEOUT,
    ));

    Flooded {
        subscriber,
        elector,
        dispatch,
        counters,
        _pusher: pusher,
    }
}

// keeps the channel busy until aborted
fn spawn_flood(broker: Arc<MemoryBroker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut n = 0usize;
        loop {
            for _ in 0..200 {
                broker.publish("flood_0", format!("burst-{n}"));
                n += 1;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

async fn wait_for_saturation(f: &Flooded) {
    wait_until(Duration::from_secs(2), || {
        f.dispatch.is_full() && PorterCounters::get(&f.counters.evicted) > 0
    })
    .await;
}

#[tokio::test]
async fn test_flooded_session_notices_takeover() {
    let store = Arc::new(MemoryLockStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let f = flooded_session(store.clone(), broker.clone());
    assert!(f.elector.try_acquire_or_renew().await);

    let (_trigger, mut shutdown) = shutdown_channel();
    let session = {
        let subscriber = f.subscriber.clone();
        tokio::spawn(async move { subscriber.run_session(&mut shutdown).await })
    };
    wait_until(Duration::from_secs(2), || broker.subscriber_count("flood_0") == 1).await;

    let flood = spawn_flood(broker.clone());
    wait_for_saturation(&f).await;

    store
        .set("it:flood:masterlock", "intruder", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    let taken_over = Instant::now();

    let end = tokio::time::timeout(RECEIVE_TIMEOUT + MARGIN, session)
        .await
        .expect("takeover not noticed in time")
        .unwrap();
    flood.abort();

    assert_matches!(end, Ok(SessionEnd::LeadershipLost));
    assert!(taken_over.elapsed() <= RECEIVE_TIMEOUT + MARGIN);
    assert!(!f.elector.is_master());
    assert_eq!(broker.subscriber_count("flood_0"), 0);
}

#[tokio::test]
async fn test_flooded_session_notices_shutdown() {
    let store = Arc::new(MemoryLockStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let f = flooded_session(store, broker.clone());
    assert!(f.elector.try_acquire_or_renew().await);

    let (trigger, mut shutdown) = shutdown_channel();
    let session = {
        let subscriber = f.subscriber.clone();
        tokio::spawn(async move { subscriber.run_session(&mut shutdown).await })
    };
    wait_until(Duration::from_secs(2), || broker.subscriber_count("flood_0") == 1).await;

    let flood = spawn_flood(broker.clone());
    wait_for_saturation(&f).await;

    trigger.trigger();
    let triggered = Instant::now();

    let end = tokio::time::timeout(RECEIVE_TIMEOUT + MARGIN, session)
        .await
        .expect("shutdown not noticed in time")
        .unwrap();
    flood.abort();

    assert_matches!(end, Ok(SessionEnd::Shutdown));
    assert!(triggered.elapsed() <= RECEIVE_TIMEOUT + MARGIN);
    // the session never blocked on the full queues
    assert!(PorterCounters::get(&f.counters.received) > 2);
    assert_eq!(broker.subscriber_count("flood_0"), 0);
}
