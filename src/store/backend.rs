//! Lock store trait definition
//!
//! This module defines the `LockStore` trait that every key/value backend
//! must implement. The surface mirrors the handful of commands the collector
//! needs from a Redis-like store: plain string keys with optional expiry,
//! a conditional set used for master election, and a list used as the
//! overflow queue.

use std::time::Duration;

use async_trait::async_trait;

use super::error::StoreResult;

/// Trait for shared key/value stores
///
/// All replicas of a collector talk to the same store. The store is the only
/// globally shared mutable resource, so every operation must be atomic with
/// respect to other replicas.
///
/// ## Semantics
///
/// - Expired keys behave exactly like missing keys.
/// - `list_push` prepends (`LPUSH`), `list_pop` removes from the tail, so
///   the pair forms a FIFO.
/// - A missing key is never an error: `get` returns `Ok(None)`, `list_pop`
///   returns `Ok(None)` after its timeout.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by the elector,
/// the overflow pusher, the drain loop and the health reporter.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read a string key
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string key, replacing any value, with optional expiry
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write a string key only if it is absent (or expired)
    ///
    /// Returns `true` if this call created the key. This is the primitive the
    /// master election is built on: ties are broken purely by which caller's
    /// write lands first.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete a key of any type (string or list)
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Prepend a value to a list, returning the new list length
    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// Remove the oldest value of a list, waiting up to `timeout` for one
    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// Length of a list (0 for a missing key)
    async fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// Lightweight connectivity probe
    async fn ping(&self) -> StoreResult<()>;
}
