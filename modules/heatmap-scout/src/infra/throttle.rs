// Politeness pacing for the public OSM services.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Used when a 429 arrives without a usable `Retry-After`.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Enforces a minimum gap between consecutive outbound calls.
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// How long to back off after a 429, capped by `max`.
pub fn backoff_delay(retry_after_secs: Option<u64>, max: Duration) -> Duration {
    retry_after_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_BACKOFF)
        .min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(Some(3), max), Duration::from_secs(3));
        assert_eq!(backoff_delay(Some(3600), max), max);
        assert_eq!(backoff_delay(None, max), DEFAULT_BACKOFF);
        assert_eq!(backoff_delay(None, Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn spaces_consecutive_calls() {
        let throttle = Throttle::new(Duration::from_millis(40));
        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn zero_interval_never_sleeps() {
        let throttle = Throttle::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            throttle.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
