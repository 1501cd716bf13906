//! Heartbeat sender for running activities

use conductor_engine::ActivityService;
use conductor_types::{ConductorError, TaskToken};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fraction of the heartbeat timeout used when the configured one is unusable
pub const DEFAULT_HEARTBEAT_FRACTION: f64 = 0.45;

/// Longest gap between two beats, however long the heartbeat timeout
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3600);

/// Sends periodic heartbeats for claimed tasks
#[derive(Clone)]
pub struct HeartbeatMonitor {
    service: Arc<dyn ActivityService>,
    fraction: f64,
}

impl HeartbeatMonitor {
    /// `fraction` must be below one half so two beats fit in every timeout
    /// window; anything else falls back to [`DEFAULT_HEARTBEAT_FRACTION`].
    pub fn new(service: Arc<dyn ActivityService>, fraction: f64) -> Self {
        let fraction = if fraction > 0.0 && fraction < 0.5 {
            fraction
        } else {
            warn!(
                fraction,
                fallback = DEFAULT_HEARTBEAT_FRACTION,
                "Heartbeat fraction must be in (0, 0.5)"
            );
            DEFAULT_HEARTBEAT_FRACTION
        };
        Self { service, fraction }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Period between beats for a given heartbeat timeout
    pub fn interval_for(&self, heartbeat_timeout: Duration) -> Duration {
        heartbeat_timeout
            .min(MAX_HEARTBEAT_INTERVAL)
            .mul_f64(self.fraction)
            .max(Duration::from_millis(1))
    }

    /// Start beating for `token` until the returned guard is dropped.
    ///
    /// `cancel` is set when the engine reports a cancellation request or
    /// stops accepting the token.
    pub fn start(
        &self,
        token: TaskToken,
        heartbeat_timeout: Duration,
        progress: Arc<Mutex<Option<serde_json::Value>>>,
        cancel: watch::Sender<bool>,
    ) -> HeartbeatGuard {
        let service = Arc::clone(&self.service);
        let interval = self.interval_for(heartbeat_timeout);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let details = progress.lock().clone();

                match service.record_heartbeat(token, details).await {
                    Ok(ack) => {
                        if ack.cancel_requested && !*cancel.borrow() {
                            info!(task_token = %token, "Activity cancellation requested");
                            cancel.send_replace(true);
                        }
                    }
                    Err(ConductorError::InvalidTaskToken(_)) => {
                        debug!(task_token = %token, "Task no longer accepts heartbeats");
                        cancel.send_replace(true);
                        break;
                    }
                    Err(e) => {
                        // Keep beating; a transient failure is not fatal
                        warn!(task_token = %token, error = %e, "Heartbeat failed");
                    }
                }
            }
        });

        HeartbeatGuard { handle }
    }
}

/// Stops the heartbeat sender when dropped
#[derive(Debug)]
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl HeartbeatGuard {
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_types::{ActivityTask, ConductorResult, HeartbeatAck};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts `accept` beats, asking for cancellation from `cancel_after` on
    #[derive(Default)]
    struct CountingService {
        beats: AtomicUsize,
        accept: usize,
        cancel_after: usize,
        last_details: Mutex<Option<serde_json::Value>>,
    }

    #[async_trait]
    impl ActivityService for CountingService {
        async fn poll_activity_task(&self, _: &str, _: &str) -> ConductorResult<ActivityTask> {
            Err(ConductorError::ShuttingDown)
        }

        async fn respond_completed(&self, _: TaskToken, _: serde_json::Value) -> ConductorResult<()> {
            Ok(())
        }

        async fn respond_failed(
            &self,
            _: TaskToken,
            _: String,
            _: Option<serde_json::Value>,
        ) -> ConductorResult<()> {
            Ok(())
        }

        async fn respond_canceled(
            &self,
            _: TaskToken,
            _: Option<serde_json::Value>,
        ) -> ConductorResult<()> {
            Ok(())
        }

        async fn record_heartbeat(
            &self,
            token: TaskToken,
            details: Option<serde_json::Value>,
        ) -> ConductorResult<HeartbeatAck> {
            let beat = self.beats.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_details.lock() = details;
            if beat > self.accept {
                return Err(ConductorError::InvalidTaskToken(token));
            }
            Ok(HeartbeatAck {
                cancel_requested: beat >= self.cancel_after,
            })
        }
    }

    #[test]
    fn test_interval_is_fraction_of_timeout() {
        let monitor = HeartbeatMonitor::new(Arc::new(CountingService::default()), 0.45);
        assert_eq!(
            monitor.interval_for(Duration::from_secs(60)),
            Duration::from_secs(27)
        );

        let invalid = HeartbeatMonitor::new(Arc::new(CountingService::default()), 2.0);
        assert_eq!(
            invalid.interval_for(Duration::from_secs(20)),
            Duration::from_secs(9)
        );
    }

    #[test]
    fn test_half_or_more_falls_back() {
        let half = HeartbeatMonitor::new(Arc::new(CountingService::default()), 0.5);
        assert_eq!(half.fraction(), DEFAULT_HEARTBEAT_FRACTION);
        assert_eq!(
            half.interval_for(Duration::from_secs(10)),
            Duration::from_millis(4500)
        );

        let below = HeartbeatMonitor::new(Arc::new(CountingService::default()), 0.4);
        assert_eq!(below.fraction(), 0.4);
        assert_eq!(
            below.interval_for(Duration::from_secs(10)),
            Duration::from_secs(4)
        );

        for fraction in [0.0, -0.1, 0.75, f64::NAN] {
            let monitor = HeartbeatMonitor::new(Arc::new(CountingService::default()), fraction);
            assert_eq!(monitor.fraction(), DEFAULT_HEARTBEAT_FRACTION);
        }
    }

    #[test]
    fn test_interval_is_capped() {
        let monitor = HeartbeatMonitor::new(Arc::new(CountingService::default()), 0.45);
        let huge = monitor.interval_for(Duration::from_secs(u64::MAX));
        assert_eq!(huge, MAX_HEARTBEAT_INTERVAL.mul_f64(0.45));
        assert!(std::time::Instant::now().checked_add(huge).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_until_guard_dropped() {
        let service = Arc::new(CountingService {
            accept: usize::MAX,
            cancel_after: usize::MAX,
            ..Default::default()
        });
        let monitor = HeartbeatMonitor::new(service.clone(), 0.4);
        let progress = Arc::new(Mutex::new(Some(serde_json::json!({"percentComplete": 10}))));
        let (cancel, _cancel_rx) = watch::channel(false);

        // Beats at 4s, 8s and 12s
        let guard = monitor.start(TaskToken::issue(), Duration::from_secs(10), progress, cancel);
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(service.beats.load(Ordering::SeqCst), 3);
        assert_eq!(
            *service.last_details.lock(),
            Some(serde_json::json!({"percentComplete": 10}))
        );

        guard.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(service.beats.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_request_is_signalled() {
        let service = Arc::new(CountingService {
            accept: usize::MAX,
            cancel_after: 2,
            ..Default::default()
        });
        let monitor = HeartbeatMonitor::new(service.clone(), 0.45);
        let (cancel, mut cancel_rx) = watch::channel(false);

        let guard = monitor.start(
            TaskToken::issue(),
            Duration::from_secs(10),
            Arc::new(Mutex::new(None)),
            cancel,
        );
        cancel_rx.wait_for(|requested| *requested).await.unwrap();
        assert_eq!(service.beats.load(Ordering::SeqCst), 2);
        assert!(guard.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_token_rejected() {
        let service = Arc::new(CountingService {
            accept: 1,
            cancel_after: usize::MAX,
            ..Default::default()
        });
        let monitor = HeartbeatMonitor::new(service.clone(), 0.45);
        let (cancel, mut cancel_rx) = watch::channel(false);

        let guard = monitor.start(
            TaskToken::issue(),
            Duration::from_secs(10),
            Arc::new(Mutex::new(None)),
            cancel,
        );
        cancel_rx.wait_for(|requested| *requested).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(service.beats.load(Ordering::SeqCst), 2);
        assert!(!guard.is_running());
    }
}
