//! Single admission entry point for the HTTP layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::backend::AdmissionBackend;
use super::decision::Decision;
use super::distributed::DistributedLimiter;
use super::limiter::LocalLimiter;
use super::reaper::ReaperHandle;
use super::LimiterConfig;
use crate::config::RedisConfig;
use crate::store::{CounterStore, RedisStore};

/// Which backend is serving decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// In-process buckets
    Local,
    /// Counters in the shared store
    Distributed,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::Distributed => write!(f, "distributed"),
        }
    }
}

/// Admission facade.
///
/// The backend is chosen once, when the facade is built, and never changes
/// afterwards. In particular a facade that fell back to local mode does not
/// switch to the shared store if it later becomes reachable.
pub struct AdmissionFacade {
    backend: Arc<dyn AdmissionBackend>,
    mode: Mode,
    config: LimiterConfig,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl AdmissionFacade {
    /// Build a facade over an in-memory limiter and start its reaper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn local(config: LimiterConfig) -> Self {
        let limiter = Arc::new(LocalLimiter::new(config));
        let reaper = limiter.spawn_reaper();

        info!(
            limit = config.limit,
            window = ?config.window,
            "Using in-memory rate limiting"
        );

        Self {
            backend: limiter,
            mode: Mode::Local,
            config,
            reaper: Mutex::new(Some(reaper)),
        }
    }

    /// Build a facade over a shared store without probing it.
    pub fn distributed(
        config: LimiterConfig,
        store: Arc<dyn CounterStore>,
        key_prefix: &str,
    ) -> Self {
        info!(
            limit = config.limit,
            window = ?config.window,
            key_prefix = %key_prefix,
            "Using distributed rate limiting"
        );

        Self {
            backend: Arc::new(DistributedLimiter::with_prefix(store, config, key_prefix)),
            mode: Mode::Distributed,
            config,
            reaper: Mutex::new(None),
        }
    }

    /// Probe `store` and use it if it answers within `probe_timeout`,
    /// otherwise fall back to in-memory limiting.
    pub async fn with_store(
        config: LimiterConfig,
        store: Arc<dyn CounterStore>,
        key_prefix: &str,
        probe_timeout: Duration,
    ) -> Self {
        match tokio::time::timeout(probe_timeout, store.ping()).await {
            Ok(Ok(())) => Self::distributed(config, store, key_prefix),
            Ok(Err(e)) => {
                warn!(error = %e, "Shared store probe failed, using in-memory rate limiting");
                Self::local(config)
            }
            Err(_) => {
                warn!(
                    timeout = ?probe_timeout,
                    "Shared store probe timed out, using in-memory rate limiting"
                );
                Self::local(config)
            }
        }
    }

    /// Connect to Redis if it is configured and reachable, otherwise use
    /// in-memory limiting.
    ///
    /// Connecting and the probe together get one `probe_timeout`.
    pub async fn connect(config: LimiterConfig, redis: Option<&RedisConfig>) -> Self {
        let Some(redis) = redis.filter(|r| r.is_configured()) else {
            info!("No shared store configured");
            return Self::local(config);
        };

        let started = Instant::now();
        match RedisStore::connect(redis).await {
            Ok(store) => {
                let remaining = redis.probe_timeout.saturating_sub(started.elapsed());
                Self::with_store(config, Arc::new(store), &redis.key_prefix, remaining).await
            }
            Err(e) => {
                warn!(error = %e, "Redis connection failed, using in-memory rate limiting");
                Self::local(config)
            }
        }
    }

    /// Decide whether `caller` may make one more request.
    pub async fn admit(&self, caller: &str) -> Decision {
        self.backend.admit(caller).await
    }

    /// Get the active mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Get the limiter configuration.
    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Stop background work. Admission keeps working afterwards, but idle
    /// local buckets are no longer reclaimed.
    pub async fn shutdown(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
            info!("Stopped idle client reaper");
        }
    }
}
