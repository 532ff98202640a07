//! Per-caller token bucket record.

use chrono::{DateTime, TimeDelta, Utc};

/// Fixed-window token bucket for a single caller.
///
/// The bucket is refilled completely, not gradually, once a full window has
/// elapsed since `window_start`. All access goes through the mutex that wraps
/// each record in the local limiter's table.
#[derive(Debug)]
pub(crate) struct ClientState {
    /// Tokens left in the current window
    tokens_remaining: u64,
    /// When the current window started
    window_start: DateTime<Utc>,
    /// Set once the record has been removed from the table
    evicted: bool,
}

impl ClientState {
    /// Create a full bucket whose window starts at `now`.
    pub fn new(limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            tokens_remaining: limit,
            window_start: now,
            evicted: false,
        }
    }

    /// Refill the bucket if more than a window has elapsed.
    ///
    /// Returns `true` if a refill happened.
    pub fn refill_if_elapsed(&mut self, limit: u64, window: TimeDelta, now: DateTime<Utc>) -> bool {
        if now.signed_duration_since(self.window_start) > window {
            self.tokens_remaining = limit;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Take one token if any are left.
    pub fn try_consume(&mut self) -> bool {
        if self.tokens_remaining == 0 {
            return false;
        }
        self.tokens_remaining -= 1;
        true
    }

    /// Tokens left in the current window.
    pub fn tokens_remaining(&self) -> u64 {
        self.tokens_remaining
    }

    /// When the current window ends.
    pub fn reset_at(&self, window: TimeDelta) -> DateTime<Utc> {
        self.window_start
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the record has gone untouched for longer than `idle_after`.
    pub fn is_idle(&self, idle_after: TimeDelta, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.window_start) > idle_after
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn mark_evicted(&mut self) {
        self.evicted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_new_bucket_is_full() {
        let state = ClientState::new(5, t0());
        assert_eq!(state.tokens_remaining(), 5);
        assert!(!state.is_evicted());
    }

    #[test]
    fn test_consume_until_empty() {
        let mut state = ClientState::new(2, t0());

        assert!(state.try_consume());
        assert!(state.try_consume());
        assert!(!state.try_consume());
        assert_eq!(state.tokens_remaining(), 0);
    }

    #[test]
    fn test_refill_requires_strictly_more_than_a_window() {
        let window = TimeDelta::seconds(1);
        let mut state = ClientState::new(3, t0());
        state.try_consume();

        // Exactly one window later is still the same window
        assert!(!state.refill_if_elapsed(3, window, t0() + window));
        assert_eq!(state.tokens_remaining(), 2);

        let later = t0() + window + TimeDelta::milliseconds(1);
        assert!(state.refill_if_elapsed(3, window, later));
        assert_eq!(state.tokens_remaining(), 3);
        assert_eq!(state.reset_at(window), later + window);
    }

    #[test]
    fn test_idle_detection() {
        let state = ClientState::new(1, t0());
        let idle_after = TimeDelta::seconds(3);

        assert!(!state.is_idle(idle_after, t0() + TimeDelta::seconds(3)));
        assert!(state.is_idle(idle_after, t0() + TimeDelta::seconds(4)));
    }
}
