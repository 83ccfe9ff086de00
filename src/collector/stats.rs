//! Per-porter counters
//!
//! Every porter owns one [`PorterCounters`] instance shared by its tasks.
//! Counters only ever grow; [`PorterStats`] is a point-in-time copy.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
pub struct PorterCounters {
    /// Payloads received from the broker
    pub received: AtomicU64,
    /// Payloads injected through `mock`
    pub mocked: AtomicU64,
    /// Payloads accepted by the dispatch queue
    pub dispatched: AtomicU64,
    /// Payloads handed to the overflow queue
    pub overflowed: AtomicU64,
    /// Payloads popped from the overflow queue by this replica
    pub overflow_drained: AtomicU64,
    /// Payloads dropped from the dispatch queue by eviction
    pub evicted: AtomicU64,
    /// Payloads dropped by whole-backlog purges of the overflow queue
    pub purged: AtomicU64,
    /// Payloads pulled from the dispatch queue by a worker
    pub handed: AtomicU64,
    pub analyzed_ok: AtomicU64,
    pub analyzed_err: AtomicU64,
    pub panicked: AtomicU64,
    /// In-flight payloads dropped by a worker reset
    pub abandoned: AtomicU64,
    pub resets: AtomicU64,
    /// Unix millis of the last broker payload (or of subscription start), 0 = never
    last_message_ms: AtomicI64,
}

impl PorterCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Mark the channel as alive right now
    pub fn touch_channel(&self) {
        self.last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        match self.last_message_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

/// Snapshot of a porter's state, served by the debug API
#[derive(Debug, Clone, Serialize)]
pub struct PorterStats {
    pub name: String,
    pub identifier: String,
    pub is_master: bool,
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub received: u64,
    pub mocked: u64,
    pub dispatched: u64,
    pub overflowed: u64,
    pub overflow_drained: u64,
    pub evicted: u64,
    pub purged: u64,
    pub handed: u64,
    pub analyzed_ok: u64,
    pub analyzed_err: u64,
    pub panicked: u64,
    pub abandoned: u64,
    pub resets: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl PorterStats {
    pub(crate) fn collect(
        name: &str,
        identifier: &str,
        is_master: bool,
        queue_len: usize,
        queue_capacity: usize,
        counters: &PorterCounters,
    ) -> Self {
        let get = PorterCounters::get;
        Self {
            name: name.to_string(),
            identifier: identifier.to_string(),
            is_master,
            queue_len,
            queue_capacity,
            received: get(&counters.received),
            mocked: get(&counters.mocked),
            dispatched: get(&counters.dispatched),
            overflowed: get(&counters.overflowed),
            overflow_drained: get(&counters.overflow_drained),
            evicted: get(&counters.evicted),
            purged: get(&counters.purged),
            handed: get(&counters.handed),
            analyzed_ok: get(&counters.analyzed_ok),
            analyzed_err: get(&counters.analyzed_err),
            panicked: get(&counters.panicked),
            abandoned: get(&counters.abandoned),
            resets: get(&counters.resets),
            last_message_at: counters.last_message_at(),
        }
    }
}
