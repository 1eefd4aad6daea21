//! Process-wide throttle for calls to the upstream price API: no two requests
//! start less than the configured gap apart, shared across all workers.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

/// Shared minimum-gap limiter. Each `acquire` reserves the next start slot
/// under the lock, then sleeps outside it, so concurrent callers queue up
/// evenly spaced starts instead of racing the clock.
#[derive(Clone)]
pub struct RequestThrottle {
    min_gap: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl RequestThrottle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait until this caller's reserved start time. Always succeeds.
    pub async fn acquire(&self) {
        let slot = {
            let mut last = self.last_start.lock().await;
            let now = Instant::now();
            let slot = match *last {
                Some(prev) if prev + self.min_gap > now => prev + self.min_gap,
                _ => now,
            };
            *last = Some(slot);
            slot
        };
        sleep_until(slot).await;
    }
}
