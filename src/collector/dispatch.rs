//! Bounded in-process FIFO between the subscriber and the worker pool

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Returned by [`DispatchQueue::try_push`] when the queue is full; hands the
/// rejected message back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFull(pub String);

/// Fixed-capacity FIFO with drop-oldest eviction
///
/// Pushes never block. Consumers wait on [`DispatchQueue::pop`], which
/// suspends until an item is available.
#[derive(Debug)]
pub struct DispatchQueue {
    items: Mutex<VecDeque<String>>,
    capacity: usize,
    available: Notify,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
        }
    }

    /// Append a message unless the queue is full
    pub fn try_push(&self, message: String) -> Result<(), QueueFull> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(QueueFull(message));
            }
            items.push_back(message);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Drop the `count` oldest messages (at least enough to make room), then append
    ///
    /// Returns the number of messages evicted.
    pub fn push_evicting(&self, message: String, count: usize) -> usize {
        let evicted = {
            let mut items = self.items.lock();
            let needed = (items.len() + 1).saturating_sub(self.capacity);
            let evicted = count.max(needed).min(items.len());
            items.drain(..evicted);
            items.push_back(message);
            evicted
        };
        self.available.notify_one();
        evicted
    }

    /// Drop up to `count` of the oldest messages, returning how many were dropped
    pub fn evict_oldest(&self, count: usize) -> usize {
        let mut items = self.items.lock();
        let evicted = count.min(items.len());
        items.drain(..evicted);
        evicted
    }

    pub fn try_pop(&self) -> Option<String> {
        self.items.lock().pop_front()
    }

    /// Wait for the next message
    pub async fn pop(&self) -> String {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop() {
                // pass the wakeup on if more work is queued
                if !self.is_empty() {
                    self.available.notify_one();
                }
                return message;
            }

            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill ratio in `[0, 1]`
    pub fn saturation(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}
