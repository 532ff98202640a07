//! In-process counter store.
//!
//! Mirrors the Redis semantics the distributed limiter relies on (lazy expiry,
//! `DECR` on a missing key yields `-1` without a TTL). Individual operations
//! can be forced to fail, which makes it suitable for exercising the fail-open
//! paths without a live server.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{CounterStore, StoreError};

/// A store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Decr,
    Ttl,
    Expire,
    Ping,
}

struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Counter store held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    failing: Mutex<HashSet<StoreOp>>,
}

impl MemoryStore {
    /// Create an empty, healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (`true`) or succeed again (`false`).
    pub fn set_offline(&self, offline: bool) {
        let mut failing = self.failing.lock();
        if offline {
            failing.extend([
                StoreOp::Get,
                StoreOp::Set,
                StoreOp::Decr,
                StoreOp::Ttl,
                StoreOp::Expire,
                StoreOp::Ping,
            ]);
        } else {
            failing.clear();
        }
    }

    /// Make a single operation fail until [`MemoryStore::set_offline`]`(false)`.
    pub fn fail_on(&self, op: StoreOp) {
        self.failing.lock().insert(op);
    }

    /// Write a raw value without an expiry, bypassing failure injection.
    pub fn put(&self, key: &str, value: i64) {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Read a raw value, bypassing failure injection.
    pub fn peek(&self, key: &str) -> Option<i64> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value)
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.failing.lock().contains(&op) {
            trace!(?op, "Injected store failure");
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

/// Drop `key` if it has expired, then hand back the live entry, if any.
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.check(StoreOp::Get)?;
        let mut entries = self.entries.lock();
        Ok(live_entry(&mut entries, key).map(|e| e.value))
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        self.check(StoreOp::Set)?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.check(StoreOp::Decr)?;
        let mut entries = self.entries.lock();
        match live_entry(&mut entries, key) {
            Some(entry) => {
                entry.value -= 1;
                Ok(entry.value)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: -1,
                        expires_at: None,
                    },
                );
                Ok(-1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check(StoreOp::Ttl)?;
        let mut entries = self.entries.lock();
        let now = Instant::now();
        Ok(live_entry(&mut entries, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check(StoreOp::Expire)?;
        let mut entries = self.entries.lock();
        if let Some(entry) = live_entry(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check(StoreOp::Ping)
    }
}
