//! Shared counter store abstraction.
//!
//! The distributed limiter only needs a handful of primitives from the shared
//! store: read an integer, write an integer with a TTL, atomically decrement,
//! and inspect or refresh the remaining TTL. Any backend offering these can be
//! plugged in behind [`CounterStore`].

mod memory;
mod redis;

pub use self::memory::{MemoryStore, StoreOp};
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while talking to a counter store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or the connection was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("{op} failed: {message}")]
    Command {
        /// Command name, e.g. `DECR`.
        op: &'static str,
        /// Error reported by the store.
        message: String,
    },

    /// A command did not complete within its deadline.
    #[error("{op} timed out after {timeout:?}")]
    Timeout {
        /// Command name.
        op: &'static str,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The store is deliberately unavailable (used by in-process stores).
    #[error("Store unavailable")]
    Unavailable,
}

/// Atomic counter-with-expiry primitive shared by all process instances.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the integer stored at `key`, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Store `value` at `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically decrement the value at `key` by one and return the new value.
    ///
    /// A missing key is treated as zero, so the result may be negative.
    async fn decr(&self, key: &str) -> Result<i64, StoreError>;

    /// Remaining time to live of `key`.
    ///
    /// Returns `None` when the key does not exist or carries no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// (Re)apply an expiry to an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Cheap liveness check used by the startup probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Convert a duration to whole milliseconds, never rounding down to zero.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
