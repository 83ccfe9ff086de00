//! Overflow (slave) queue kept in the shared lock store
//!
//! The master hands payloads it cannot dispatch locally to a bounded
//! in-process buffer; a pusher task moves them into the store list. Every
//! replica, master or not, runs a drain loop that pops from the list into its
//! own dispatch queue, so standby replicas absorb load the master cannot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, instrument, trace, warn};

use super::dispatch::DispatchQueue;
use super::spill::Spill;
use super::stats::PorterCounters;
use super::supervisor::Shutdown;
use crate::store::{LockStore, StoreResult};

/// Poll interval of the drain loop while the local dispatch queue is full
const DISPATCH_FULL_BACKOFF: Duration = Duration::from_millis(100);

/// Producer side of the overflow queue
pub struct OverflowQueue {
    store: Arc<dyn LockStore>,
    key: String,
    cap: usize,
    buffer: mpsc::Sender<String>,
}

/// Moves buffered payloads into the store; cheap to clone so it can be
/// relaunched by the supervisor
#[derive(Clone)]
pub struct OverflowPusher {
    store: Arc<dyn LockStore>,
    key: String,
    retry_delay: Duration,
    buffer: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl OverflowQueue {
    pub fn new(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        buffer_size: usize,
        cap: usize,
        retry_delay: Duration,
    ) -> (Self, OverflowPusher) {
        let key = key.into();
        let (tx, rx) = mpsc::channel(buffer_size.max(1));

        let queue = Self {
            store: store.clone(),
            key: key.clone(),
            cap,
            buffer: tx,
        };
        let pusher = OverflowPusher {
            store,
            key,
            retry_delay,
            buffer: Arc::new(Mutex::new(rx)),
        };
        (queue, pusher)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Hand a payload to the pusher without waiting
    ///
    /// Gives the payload back if the buffer is full (or the pusher is gone),
    /// i.e. when pushing would block.
    pub fn try_push(&self, message: String) -> Result<(), String> {
        self.buffer.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(message) => message,
            mpsc::error::TrySendError::Closed(message) => message,
        })
    }

    /// Delete the whole backlog if it has grown beyond the cap
    ///
    /// Returns the number of purged payloads, if a purge happened.
    pub async fn purge_if_over_cap(&self) -> StoreResult<Option<usize>> {
        let len = self.store.list_len(&self.key).await?;
        if len <= self.cap {
            return Ok(None);
        }

        self.store.delete(&self.key).await?;
        Ok(Some(len))
    }

    /// Pop the oldest backlog entry, waiting up to `timeout`
    pub async fn pop(&self, timeout: Duration) -> StoreResult<Option<String>> {
        self.store.list_pop(&self.key, timeout).await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.store.list_len(&self.key).await
    }

    /// Drain the backlog into the local dispatch queue until shutdown
    #[instrument(skip_all, fields(queue = %self.key))]
    pub async fn run_drain(
        &self,
        dispatch: Arc<DispatchQueue>,
        spill: Arc<Spill>,
        counters: Arc<PorterCounters>,
        pop_timeout: Duration,
        retry_delay: Duration,
        mut shutdown: Shutdown,
    ) {
        debug!("overflow drain loop started");

        while !shutdown.is_triggered() {
            match self.purge_if_over_cap().await {
                Ok(Some(purged)) => {
                    warn!("overflow queue exceeded cap of {}, purged {purged} payloads", self.cap);
                    PorterCounters::add(&counters.purged, purged);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("failed to check overflow queue length: {e}");
                    shutdown.sleep(retry_delay).await;
                    continue;
                }
            }

            if dispatch.is_full() {
                shutdown.sleep(DISPATCH_FULL_BACKOFF).await;
                continue;
            }

            let popped = tokio::select! {
                popped = self.pop(pop_timeout) => popped,
                _ = shutdown.wait() => break,
            };

            match popped {
                Ok(Some(message)) => {
                    trace!("drained payload from overflow queue");
                    PorterCounters::incr(&counters.overflow_drained);
                    spill.offer_local(message);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("failed to pop from overflow queue: {e}");
                    shutdown.sleep(retry_delay).await;
                }
            }
        }

        debug!("overflow drain loop stopped");
    }
}

impl OverflowPusher {
    /// Push buffered payloads into the store until shutdown, then flush what is left
    #[instrument(skip_all, fields(queue = %self.key))]
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut buffer = self.buffer.lock().await;

        loop {
            let message = tokio::select! {
                message = buffer.recv() => message,
                _ = shutdown.wait() => break,
            };
            let Some(message) = message else {
                return;
            };

            while let Err(e) = self.store.list_push(&self.key, &message).await {
                error!("failed to push to overflow queue: {e}");
                if !shutdown.sleep(self.retry_delay).await {
                    warn!("dropping overflow payload at shutdown");
                    break;
                }
            }
        }

        let mut flushed = 0usize;
        while let Ok(message) = buffer.try_recv() {
            match self.store.list_push(&self.key, &message).await {
                Ok(_) => flushed += 1,
                Err(e) => {
                    error!("failed to flush overflow buffer: {e}");
                    break;
                }
            }
        }
        if flushed > 0 {
            debug!("flushed {flushed} buffered payloads at shutdown");
        }
    }
}
