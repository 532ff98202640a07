//! Background reclamation of idle local buckets.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::limiter::LocalLimiter;

/// Handle to a running reaper task.
///
/// Dropping the handle aborts the task.
pub struct ReaperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a task calling [`LocalLimiter::reap_idle`] every `period`.
pub(crate) fn spawn(limiter: Weak<LocalLimiter>, period: Duration) -> ReaperHandle {
    let period = period.max(Duration::from_millis(1));
    let (stop, mut stopped) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(period = ?period, "Reaper started");

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    let Some(limiter) = limiter.upgrade() else {
                        break;
                    };

                    let removed = limiter.reap_idle();
                    if removed > 0 {
                        debug!(
                            removed = removed,
                            tracked = limiter.tracked_clients(),
                            "Reclaimed idle clients"
                        );
                    }
                }
            }
        }

        debug!("Reaper stopped");
    });

    ReaperHandle {
        stop: Some(stop),
        task,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ratelimit::LimiterConfig;

    #[tokio::test]
    async fn test_reaper_reclaims_idle_clients() {
        let limiter = Arc::new(LocalLimiter::new(LimiterConfig::new(5, Duration::from_millis(50))));
        let reaper = limiter.spawn_reaper();

        limiter.admit("idle");
        assert_eq!(limiter.tracked_clients(), 1);

        // Idle after 150ms, reaper ticks every 100ms
        time::sleep(Duration::from_millis(400)).await;

        assert_eq!(limiter.tracked_clients(), 0);
        reaper.shutdown().await;
    }

    #[tokio::test]
    async fn test_reaper_keeps_active_clients() {
        let config = LimiterConfig::new(100, Duration::from_millis(50));
        let limiter = Arc::new(LocalLimiter::new(config));
        let reaper = limiter.spawn_reaper();

        for _ in 0..8 {
            limiter.admit("busy");
            time::sleep(Duration::from_millis(40)).await;
        }

        assert_eq!(limiter.tracked_clients(), 1);
        reaper.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_reaping() {
        let limiter = Arc::new(LocalLimiter::new(LimiterConfig::new(5, Duration::from_millis(20))));
        let reaper = limiter.spawn_reaper();

        reaper.shutdown().await;

        limiter.admit("caller");
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_reaper_exits_when_limiter_dropped() {
        let limiter = Arc::new(LocalLimiter::new(LimiterConfig::new(5, Duration::from_millis(10))));
        let reaper = limiter.spawn_reaper();

        drop(limiter);
        time::sleep(Duration::from_millis(100)).await;

        assert!(reaper.is_finished());
    }
}
