//! Fixed-size worker pool feeding the dispatch queue into an [`Analyzer`]
//!
//! Each worker pulls one payload at a time. Analyzer errors and panics are
//! contained per payload: they are logged with the raw payload, counted, and
//! the worker moves on. A reset broadcast makes every busy worker abandon the
//! payload it is working on and go back to the queue; the reset monitor sends
//! one when the queue stays saturated.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, trace, warn};

use super::analyzer::Analyzer;
use super::dispatch::DispatchQueue;
use super::stats::PorterCounters;
use super::supervisor::{Shutdown, panic_message, spawn_supervised};

/// Saturation policy of the reset monitor
#[derive(Debug, Clone, Copy)]
pub struct ResetPolicy {
    /// Saturation at or above which a sample counts as saturated
    pub threshold: f64,
    /// Consecutive saturated samples that trigger a reset
    pub after: usize,
    pub check_interval: Duration,
}

pub struct WorkerPool {
    porter: String,
    size: usize,
    dispatch: Arc<DispatchQueue>,
    analyzer: Arc<dyn Analyzer>,
    counters: Arc<PorterCounters>,
    reset: broadcast::Sender<()>,
}

impl WorkerPool {
    pub fn new(
        porter: impl Into<String>,
        size: usize,
        dispatch: Arc<DispatchQueue>,
        analyzer: Arc<dyn Analyzer>,
        counters: Arc<PorterCounters>,
    ) -> Self {
        let (reset, _) = broadcast::channel(16);
        Self {
            porter: porter.into(),
            size: size.max(1),
            dispatch,
            analyzer,
            counters,
            reset,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Make every busy worker drop its in-flight payload
    pub fn reset(&self) {
        PorterCounters::incr(&self.counters.resets);
        let _ = self.reset.send(());
    }

    /// Launch every worker under the run-with-recovery supervisor
    pub fn spawn(self: &Arc<Self>, restart_delay: Duration, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        (0..self.size)
            .map(|id| {
                let pool = self.clone();
                let worker_shutdown = shutdown.clone();
                spawn_supervised(
                    format!("{} worker {id}", self.porter),
                    restart_delay,
                    shutdown.clone(),
                    move || pool.clone().run_worker(id, worker_shutdown.clone()),
                )
            })
            .collect()
    }

    /// Pull and analyze payloads until shutdown
    ///
    /// A payload being analyzed when shutdown arrives is finished first.
    #[instrument(skip(self, shutdown), fields(porter = %self.porter))]
    pub async fn run_worker(self: Arc<Self>, id: usize, mut shutdown: Shutdown) {
        let mut reset = self.reset.subscribe();
        debug!("worker started");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                message = self.dispatch.pop() => message,
            };
            PorterCounters::incr(&self.counters.handed);

            // resets sent while idle do not apply to this payload
            while !matches!(
                reset.try_recv(),
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed)
            ) {}

            let analysis = AssertUnwindSafe(self.analyzer.analyze(&message)).catch_unwind();

            tokio::select! {
                outcome = analysis => match outcome {
                    Ok(Ok(())) => {
                        trace!("payload analyzed");
                        PorterCounters::incr(&self.counters.analyzed_ok);
                    }
                    Ok(Err(e)) => {
                        PorterCounters::incr(&self.counters.analyzed_err);
                        error!("failed to analyze payload {message}: {e:#}");
                    }
                    Err(panic) => {
                        PorterCounters::incr(&self.counters.panicked);
                        error!(
                            "analyzer panicked on payload {message}: {}",
                            panic_message(panic.as_ref())
                        );
                    }
                },
                _ = reset_signal(&mut reset) => {
                    PorterCounters::incr(&self.counters.abandoned);
                    warn!("worker reset, abandoned in-flight payload");
                }
            }
        }

        debug!("worker stopped");
    }

    /// Sample queue saturation and reset the workers when it stays high
    #[instrument(skip_all, fields(porter = %self.porter))]
    pub async fn run_reset_monitor(self: Arc<Self>, policy: ResetPolicy, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(policy.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut saturated = 0usize;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }

            let saturation = self.dispatch.saturation();
            if saturation >= policy.threshold {
                saturated += 1;
            } else {
                saturated = 0;
            }

            if saturated >= policy.after.max(1) {
                warn!(
                    "dispatch queue at {:.0}% for {saturated} consecutive checks, resetting workers",
                    saturation * 100.0
                );
                self.reset();
                saturated = 0;
            }
        }
    }
}

/// Resolves on the next reset; never resolves once the pool is gone
async fn reset_signal(rx: &mut broadcast::Receiver<()>) {
    match rx.recv().await {
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
    }
}
