// src/rate_gate.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-interval gate shared by every caller of one source.
/// - First call passes immediately.
/// - Later calls wait until `min_interval` has elapsed since the previous call started.
/// - Callers queue on the mutex (width 1), so there are no bursts.
#[derive(Debug, Clone)]
pub struct RateGate {
    min_interval: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for our turn, then stamp the call time. Returns how long we waited.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_call.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(ts) = *last {
            let since = ts.elapsed();
            if since < self.min_interval {
                waited = self.min_interval - since;
                // sleeping with the lock held is what serializes concurrent callers
                tokio::time::sleep(waited).await;
            }
        }
        *last = Some(Instant::now());
        waited
    }
}
