use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Idle interval enforced after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    interval: Duration,
}

impl Throttle {
    /// Throttle pausing for `interval`
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Configured pause
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep for the interval; a zero interval returns immediately
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        debug!(interval_ms = self.interval.as_millis() as u64, "Throttling");
        tokio::time::sleep(self.interval).await;
    }

    /// Sleep for the interval unless `cancel` fires first
    ///
    /// Returns `false` when the wait was cut short by cancellation.
    pub async fn wait_or_cancel(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.wait() => true,
            _ = cancel.cancelled() => {
                debug!("Throttle interrupted by cancellation");
                false
            }
        }
    }
}
