//! Distributed rate limiter using a shared counter store.
//!
//! Every process instance reads and decrements the same per-caller counter,
//! so the instances together enforce one logical limit. The counter holds the
//! tokens remaining in the window and its TTL marks where the window ends.
//!
//! The store is never allowed to take the service down: any store error admits
//! the request instead of rejecting it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::backend::AdmissionBackend;
use super::clock::{after, Clock, SystemClock};
use super::decision::Decision;
use super::key::{counter_key, mask_caller};
use super::LimiterConfig;
use crate::store::{CounterStore, StoreError};

/// Default namespace for counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// A rate limiter whose state lives in a shared [`CounterStore`].
pub struct DistributedLimiter {
    /// The shared store
    store: Arc<dyn CounterStore>,
    /// Limit and window
    config: LimiterConfig,
    /// Namespace prepended to caller identities
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl DistributedLimiter {
    /// Create a new distributed limiter with the default key prefix.
    pub fn new(store: Arc<dyn CounterStore>, config: LimiterConfig) -> Self {
        Self::with_prefix(store, config, DEFAULT_KEY_PREFIX)
    }

    /// Create a new distributed limiter with a custom key prefix.
    pub fn with_prefix(
        store: Arc<dyn CounterStore>,
        config: LimiterConfig,
        key_prefix: &str,
    ) -> Self {
        Self {
            store,
            config,
            key_prefix: key_prefix.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Check and consume budget for `caller` in the shared store.
    pub async fn admit(&self, caller: &str) -> Decision {
        let key = counter_key(&self.key_prefix, caller);
        let limit = i64::try_from(self.config.limit).unwrap_or(i64::MAX);
        let now = self.clock.now();

        trace!(caller = %mask_caller(caller), "Checking distributed rate limit");

        let current = match self.store.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                // First request of a window; the TTL set here is the window.
                if let Err(e) = self.store.set_with_ttl(&key, limit, self.config.window).await {
                    return self.fail_open(caller, "initialize counter", &e, now);
                }
                debug!(caller = %mask_caller(caller), limit = limit, "Initialized shared counter");
                limit
            }
            Err(e) => return self.fail_open(caller, "read counter", &e, now),
        };

        let reset_at = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => after(now, ttl),
            Ok(None) => after(now, self.config.window),
            Err(e) => {
                warn!(caller = %mask_caller(caller), error = %e, "Failed to read counter TTL");
                after(now, self.config.window)
            }
        };

        // The stored value may have been decremented past zero by racing
        // instances; anything at or below zero means no budget.
        if current <= 0 {
            debug!(
                caller = %mask_caller(caller),
                current = current,
                "Distributed rate limit exceeded"
            );
            return Decision::deny(self.config.limit, reset_at);
        }

        let remaining = u64::try_from(current - 1).unwrap_or(0);

        match self.store.decr(&key).await {
            Ok(value) if value == limit - 1 => {
                // First decrement of the window: make sure the key expires even
                // if a racing instance created it without a TTL.
                if let Err(e) = self.store.expire(&key, self.config.window).await {
                    warn!(
                        caller = %mask_caller(caller),
                        error = %e,
                        "Failed to refresh counter TTL"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => return self.fail_open(caller, "decrement counter", &e, now),
        }

        Decision::allow(self.config.limit, remaining, reset_at)
    }

    fn fail_open(
        &self,
        caller: &str,
        action: &str,
        error: &StoreError,
        now: DateTime<Utc>,
    ) -> Decision {
        warn!(
            caller = %mask_caller(caller),
            error = %error,
            "Failed to {}, admitting request",
            action
        );
        Decision::fail_open(self.config.limit, after(now, self.config.window))
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

#[async_trait]
impl AdmissionBackend for DistributedLimiter {
    async fn admit(&self, caller: &str) -> Decision {
        DistributedLimiter::admit(self, caller).await
    }
}
