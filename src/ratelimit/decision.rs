//! Admission decisions and the header values derived from them.

use chrono::{DateTime, Utc};

/// Header carrying the configured limit.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the remaining budget.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the window reset as Unix seconds.
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Budget left in the window after this request
    pub remaining: u64,
    /// Configured requests per window
    pub limit: u64,
    /// When the window resets
    pub reset_at: DateTime<Utc>,
    /// `false` when the decision was made without consulting any counter
    /// because the shared store failed
    pub enforced: bool,
}

impl Decision {
    pub fn allow(limit: u64, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_at,
            enforced: true,
        }
    }

    pub fn deny(limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            reset_at,
            enforced: true,
        }
    }

    /// Admit without enforcement; nothing was consumed.
    pub fn fail_open(limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            limit,
            reset_at,
            enforced: false,
        }
    }

    /// Reset time as seconds since the Unix epoch.
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// The three rate limit header values for this decision.
    pub fn headers(&self) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: self.limit,
            remaining: self.remaining,
            reset: self.reset_unix(),
        }
    }
}

/// Numeric values of the rate limit response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

impl RateLimitHeaders {
    /// Header name/value pairs in emission order.
    pub fn pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ]
    }
}
