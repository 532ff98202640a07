//! In-memory rate limiter implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::backend::AdmissionBackend;
use super::client::ClientState;
use super::clock::{delta, Clock, SystemClock};
use super::decision::Decision;
use super::key::mask_caller;
use super::reaper::{self, ReaperHandle};
use super::LimiterConfig;

/// Records idle for this many windows are reclaimed.
const IDLE_WINDOWS: i32 = 3;
/// The reaper runs once per this many windows.
const REAP_EVERY_WINDOWS: u32 = 2;

/// Process-local fixed-window limiter.
///
/// The table lock only guards insertion, lookup and removal of records. Token
/// accounting happens under each record's own mutex, so unrelated callers
/// never wait on each other beyond the brief table access.
pub struct LocalLimiter {
    config: LimiterConfig,
    /// Window length as a signed delta for timestamp arithmetic
    window: TimeDelta,
    /// Age after which an untouched record is reclaimed
    idle_after: TimeDelta,
    /// Bucket per caller identity
    clients: RwLock<HashMap<String, Arc<Mutex<ClientState>>>>,
    clock: Arc<dyn Clock>,
}

impl LocalLimiter {
    /// Create a limiter reading the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter reading the given clock.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let window = delta(config.window);
        Self {
            config,
            window,
            idle_after: window.checked_mul(IDLE_WINDOWS).unwrap_or(TimeDelta::MAX),
            clients: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Check and consume budget for `caller`.
    ///
    /// An empty identity is a caller like any other, so every request without
    /// an identity shares one bucket.
    pub fn admit(&self, caller: &str) -> Decision {
        let now = self.clock.now();

        loop {
            let client = self.client(caller, now);
            let mut state = client.lock();

            // Lost a race with the reaper; the record is no longer in the table.
            if state.is_evicted() {
                continue;
            }

            if state.refill_if_elapsed(self.config.limit, self.window, now) {
                trace!(caller = %mask_caller(caller), "Refilled bucket");
            }

            let reset_at = state.reset_at(self.window);

            if !state.try_consume() {
                debug!(caller = %mask_caller(caller), "Local rate limit exceeded");
                return Decision::deny(self.config.limit, reset_at);
            }

            return Decision::allow(self.config.limit, state.tokens_remaining(), reset_at);
        }
    }

    /// Fetch the record for `caller`, creating a full one if needed.
    fn client(&self, caller: &str, now: DateTime<Utc>) -> Arc<Mutex<ClientState>> {
        if let Some(client) = self.clients.read().get(caller) {
            return client.clone();
        }

        let mut clients = self.clients.write();
        clients
            .entry(caller.to_string())
            .or_insert_with(|| {
                debug!(
                    caller = %mask_caller(caller),
                    limit = self.config.limit,
                    window = ?self.config.window,
                    "Creating new client bucket"
                );
                Arc::new(Mutex::new(ClientState::new(self.config.limit, now)))
            })
            .clone()
    }

    /// Remove every record idle for more than three windows.
    ///
    /// Returns how many records were removed.
    pub fn reap_idle(&self) -> usize {
        let now = self.clock.now();
        let mut clients = self.clients.write();
        let before = clients.len();

        clients.retain(|caller, client| {
            let mut state = client.lock();
            if state.is_idle(self.idle_after, now) {
                trace!(caller = %mask_caller(caller), "Reclaiming idle client");
                state.mark_evicted();
                false
            } else {
                true
            }
        });

        before - clients.len()
    }

    /// Start the background task that periodically calls [`reap_idle`].
    ///
    /// Must be called from within a Tokio runtime. The task stops when the
    /// handle is shut down or dropped, or when the limiter itself is dropped.
    ///
    /// [`reap_idle`]: LocalLimiter::reap_idle
    pub fn spawn_reaper(self: &Arc<Self>) -> ReaperHandle {
        let period = self
            .config
            .window
            .checked_mul(REAP_EVERY_WINDOWS)
            .unwrap_or(Duration::MAX);
        reaper::spawn(Arc::downgrade(self), period)
    }

    /// Get the number of tracked callers.
    pub fn tracked_clients(&self) -> usize {
        self.clients.read().len()
    }

    /// Tokens left for `caller`, or `None` if the caller is not tracked.
    ///
    /// This does not apply a pending refill.
    pub fn tokens_remaining(&self, caller: &str) -> Option<u64> {
        let client = self.clients.read().get(caller).cloned()?;
        let tokens = client.lock().tokens_remaining();
        Some(tokens)
    }
}

#[async_trait]
impl AdmissionBackend for LocalLimiter {
    async fn admit(&self, caller: &str) -> Decision {
        LocalLimiter::admit(self, caller)
    }
}
