//! Three-tier placement of incoming payloads
//!
//! 1. push to the local dispatch queue
//! 2. if full, hand off to the overflow queue
//! 3. if that would block too, evict the oldest entries and push locally
//!
//! Payloads that came out of the overflow queue (or were injected by `mock`)
//! skip tier 2 so they never bounce back into the store.

use std::sync::Arc;

use tracing::{trace, warn};

use super::dispatch::DispatchQueue;
use super::overflow::OverflowQueue;
use super::stats::PorterCounters;

/// Where a payload ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Dispatched,
    Overflowed,
    /// Pushed locally after evicting this many older payloads
    Evicted(usize),
}

pub struct Spill {
    porter: String,
    dispatch: Arc<DispatchQueue>,
    overflow: Arc<OverflowQueue>,
    counters: Arc<PorterCounters>,
    evict_count: usize,
}

impl Spill {
    pub fn new(
        porter: impl Into<String>,
        dispatch: Arc<DispatchQueue>,
        overflow: Arc<OverflowQueue>,
        counters: Arc<PorterCounters>,
        evict_count: usize,
    ) -> Self {
        Self {
            porter: porter.into(),
            dispatch,
            overflow,
            counters,
            evict_count,
        }
    }

    /// Place a payload received from the broker
    pub fn offer(&self, message: String) -> Placement {
        let message = match self.dispatch.try_push(message) {
            Ok(()) => return self.dispatched(),
            Err(full) => full.0,
        };

        match self.overflow.try_push(message) {
            Ok(()) => {
                trace!("dispatch queue full, payload moved to overflow queue");
                PorterCounters::incr(&self.counters.overflowed);
                Placement::Overflowed
            }
            Err(message) => self.evict_and_push(message),
        }
    }

    /// Place a payload that must stay in this process
    pub fn offer_local(&self, message: String) -> Placement {
        match self.dispatch.try_push(message) {
            Ok(()) => self.dispatched(),
            Err(full) => self.evict_and_push(full.0),
        }
    }

    fn dispatched(&self) -> Placement {
        PorterCounters::incr(&self.counters.dispatched);
        Placement::Dispatched
    }

    fn evict_and_push(&self, message: String) -> Placement {
        let evicted = self.dispatch.push_evicting(message, self.evict_count);
        PorterCounters::add(&self.counters.evicted, evicted);
        PorterCounters::incr(&self.counters.dispatched);
        warn!(
            porter = %self.porter,
            "dispatch and overflow queues saturated, evicted {evicted} oldest payloads"
        );
        Placement::Evicted(evicted)
    }
}
