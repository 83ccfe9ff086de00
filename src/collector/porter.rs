//! The porter: one leader-elected collector engine
//!
//! A [`CollectorPorter`] wires the election, subscription, queues, worker
//! pool and health reporting of one logical collector together. Every replica
//! of a collector runs the same porter; the lock store decides which one is
//! master.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::analyzer::Analyzer;
use super::dispatch::DispatchQueue;
use super::elector::{MasterElector, process_identifier};
use super::health::HealthReporter;
use super::overflow::{OverflowPusher, OverflowQueue};
use super::spill::Spill;
use super::stats::{PorterCounters, PorterStats};
use super::subscriber::{ChannelSubscriber, SessionEnd};
use super::supervisor::{Shutdown, run_with_recovery, spawn_supervised};
use super::workers::{ResetPolicy, WorkerPool};
use crate::broker::ChannelBroker;
use crate::cache::HostCache;
use crate::config::ResolvedPorterConfig;
use crate::store::{LockStore, StoreKeys};

/// Time given to background tasks to wind down after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Contract every collector exposes to the binary and the debug API
#[async_trait]
pub trait Porter: Send + Sync {
    fn name(&self) -> &str;

    /// Run until shutdown, retrying internally on any failure
    async fn run(&self) -> anyhow::Result<()>;

    /// Feed a payload straight into the local dispatch queue
    fn mock(&self, message: String) -> anyhow::Result<()>;

    fn stats(&self) -> PorterStats;
}

pub struct CollectorPorter {
    config: ResolvedPorterConfig,
    keys: StoreKeys,
    store: Arc<dyn LockStore>,
    broker: Arc<dyn ChannelBroker>,
    elector: Arc<MasterElector>,
    dispatch: Arc<DispatchQueue>,
    overflow: Arc<OverflowQueue>,
    pusher: OverflowPusher,
    spill: Arc<Spill>,
    workers: Arc<WorkerPool>,
    counters: Arc<PorterCounters>,
    host_cache: Option<Arc<HostCache>>,
    shutdown: Shutdown,
    running: AtomicBool,
}

impl CollectorPorter {
    pub fn new(
        config: ResolvedPorterConfig,
        store: Arc<dyn LockStore>,
        broker: Arc<dyn ChannelBroker>,
        analyzer: Arc<dyn Analyzer>,
        shutdown: Shutdown,
    ) -> Self {
        let keys = StoreKeys::new(&config.namespace, &config.name);
        let counters = Arc::new(PorterCounters::new());

        let elector = Arc::new(MasterElector::new(
            store.clone(),
            keys.master_lock.clone(),
            process_identifier(),
            config.lock_ttl,
        ));

        let dispatch = Arc::new(DispatchQueue::new(config.dispatch_capacity));
        let (overflow, pusher) = OverflowQueue::new(
            store.clone(),
            keys.queue.clone(),
            config.overflow_buffer,
            config.overflow_cap,
            config.retry_delay,
        );
        let overflow = Arc::new(overflow);

        let spill = Arc::new(Spill::new(
            config.name.clone(),
            dispatch.clone(),
            overflow.clone(),
            counters.clone(),
            config.evict_count,
        ));

        let workers = Arc::new(WorkerPool::new(
            config.name.clone(),
            config.workers,
            dispatch.clone(),
            analyzer,
            counters.clone(),
        ));

        Self {
            config,
            keys,
            store,
            broker,
            elector,
            dispatch,
            overflow,
            pusher,
            spill,
            workers,
            counters,
            host_cache: None,
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Keep this host cache fresh for as long as the porter runs
    pub fn with_host_cache(mut self, cache: Arc<HostCache>) -> Self {
        self.host_cache = Some(cache);
        self
    }

    /// Replace the generated process identifier used for the master lock
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.elector = Arc::new(MasterElector::new(
            self.store.clone(),
            self.keys.master_lock.clone(),
            identifier,
            self.config.lock_ttl,
        ));
        self
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    pub fn is_master(&self) -> bool {
        self.elector.is_master()
    }

    fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let name = &self.config.name;
        let restart = self.config.retry_delay;
        let shutdown = &self.shutdown;

        let mut tasks = self.workers.spawn(restart, shutdown);

        let workers = self.workers.clone();
        let policy = ResetPolicy {
            threshold: self.config.reset_threshold,
            after: self.config.reset_after,
            check_interval: self.config.reset_check_interval,
        };
        let task_shutdown = shutdown.clone();
        tasks.push(spawn_supervised(
            format!("{name} reset monitor"),
            restart,
            shutdown.clone(),
            move || workers.clone().run_reset_monitor(policy, task_shutdown.clone()),
        ));

        let pusher = self.pusher.clone();
        let task_shutdown = shutdown.clone();
        tasks.push(spawn_supervised(
            format!("{name} overflow pusher"),
            restart,
            shutdown.clone(),
            move || pusher.clone().run(task_shutdown.clone()),
        ));

        let overflow = self.overflow.clone();
        let dispatch = self.dispatch.clone();
        let spill = self.spill.clone();
        let counters = self.counters.clone();
        let pop_timeout = self.config.overflow_pop_timeout;
        let task_shutdown = shutdown.clone();
        tasks.push(spawn_supervised(
            format!("{name} overflow drain"),
            restart,
            shutdown.clone(),
            move || {
                let overflow = overflow.clone();
                let dispatch = dispatch.clone();
                let spill = spill.clone();
                let counters = counters.clone();
                let shutdown = task_shutdown.clone();
                async move {
                    overflow
                        .run_drain(dispatch, spill, counters, pop_timeout, restart, shutdown)
                        .await
                }
            },
        ));

        let health = Arc::new(HealthReporter::new(
            name.clone(),
            self.keys.channel_status.clone(),
            self.broker.clone(),
            self.store.clone(),
            self.elector.clone(),
            self.counters.clone(),
            self.config.health_interval,
            self.config.channel_empty_after,
        ));
        let task_shutdown = shutdown.clone();
        tasks.push(spawn_supervised(
            format!("{name} health reporter"),
            restart,
            shutdown.clone(),
            move || {
                let health = health.clone();
                let shutdown = task_shutdown.clone();
                async move { health.run(shutdown).await }
            },
        ));

        if let Some(cache) = &self.host_cache {
            let cache = cache.clone();
            let task_shutdown = shutdown.clone();
            tasks.push(spawn_supervised(
                format!("{name} host cache refresh"),
                restart,
                shutdown.clone(),
                move || HostCache::run_refresh_loop(cache.clone(), task_shutdown.clone()),
            ));
        }

        tasks
    }
}

#[async_trait]
impl Porter for CollectorPorter {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self), fields(porter = %self.config.name))]
    async fn run(&self) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            anyhow::bail!("porter '{}' is already running", self.config.name);
        }

        info!(
            "starting as {} with {} workers, dispatch capacity {}",
            self.elector.identifier(),
            self.workers.size(),
            self.dispatch.capacity()
        );

        let tasks = self.spawn_background();

        let subscriber = Arc::new(ChannelSubscriber::new(
            self.config.name.clone(),
            self.config.channels.clone(),
            self.broker.clone(),
            self.elector.clone(),
            self.spill.clone(),
            self.counters.clone(),
            self.config.receive_timeout,
            self.config.election_interval,
        ));
        let elector = self.elector.clone();
        let election_interval = self.config.election_interval;
        let retry_delay = self.config.retry_delay;
        let loop_shutdown = self.shutdown.clone();

        run_with_recovery(
            &format!("{} master loop", self.config.name),
            retry_delay,
            self.shutdown.clone(),
            move || {
                master_loop(
                    elector.clone(),
                    subscriber.clone(),
                    election_interval,
                    retry_delay,
                    loop_shutdown.clone(),
                )
            },
        )
        .await;

        self.elector.resign().await;

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!("background tasks still busy after {SHUTDOWN_GRACE:?}, aborting them");
            for abort in aborts {
                abort.abort();
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("stopped");
        Ok(())
    }

    fn mock(&self, message: String) -> anyhow::Result<()> {
        if self.shutdown.is_triggered() {
            anyhow::bail!("porter '{}' is shutting down", self.config.name);
        }

        PorterCounters::incr(&self.counters.mocked);
        let placement = self.spill.offer_local(message);
        debug!(porter = %self.config.name, "mocked payload placed: {placement:?}");
        Ok(())
    }

    fn stats(&self) -> PorterStats {
        PorterStats::collect(
            &self.config.name,
            self.elector.identifier(),
            self.elector.is_master(),
            self.dispatch.len(),
            self.dispatch.capacity(),
            &self.counters,
        )
    }
}

/// Acquire mastership, run subscription sessions while master, retry on failure
async fn master_loop(
    elector: Arc<MasterElector>,
    subscriber: Arc<ChannelSubscriber>,
    election_interval: Duration,
    retry_delay: Duration,
    mut shutdown: Shutdown,
) {
    while !shutdown.is_triggered() {
        if !elector.try_acquire_or_renew().await {
            shutdown.sleep(election_interval).await;
            continue;
        }

        match subscriber.run_session(&mut shutdown).await {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::LeadershipLost) => info!("stepped down to follower"),
            Err(e) => {
                error!("subscription failed: {e}, retrying in {retry_delay:?}");
                elector.resign().await;
                shutdown.sleep(retry_delay).await;
            }
        }
    }

    elector.resign().await;
}
