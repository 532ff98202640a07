//! Rate limiting logic and state management.

mod backend;
mod client;
mod clock;
mod decision;
mod distributed;
mod facade;
mod key;
mod limiter;
mod reaper;

use std::time::Duration;

pub use backend::AdmissionBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, RateLimitHeaders};
pub use distributed::DistributedLimiter;
pub use facade::{AdmissionFacade, Mode};
pub use key::{counter_key, mask_caller};
pub use limiter::LocalLimiter;
pub use reaper::ReaperHandle;

/// Immutable limiter parameters shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum requests admitted per window
    pub limit: u64,
    /// Length of a window
    pub window: Duration,
}

impl LimiterConfig {
    /// Create a new limiter configuration.
    ///
    /// Both values are expected to have been validated as positive by the
    /// configuration loader.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}
