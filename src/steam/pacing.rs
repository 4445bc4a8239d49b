//! Request pacing.
//!
//! A `RateGate` enforces a minimum spacing between consecutive requests
//! to one endpoint family. All fetchers that hit the same family share
//! one gate, so "at most one request per interval" holds no matter
//! which component issues the call.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Fixed-interval gate. Waiters are served in lock order; each one is
/// released no earlier than `interval` after the previous release.
pub struct RateGate {
    name: &'static str,
    interval: Duration,
    last_release: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            last_release: Mutex::new(None),
        }
    }

    /// A gate that never waits.
    pub fn unlimited(name: &'static str) -> Self {
        Self::new(name, Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may be sent.
    pub async fn wait(&self) {
        let mut last = self.last_release.lock().await;
        if let Some(prev) = *last {
            let next = prev + self.interval;
            if Instant::now() < next {
                trace!(gate = self.name, wait_ms = (next - Instant::now()).as_millis() as u64, "Pacing request");
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Exponential backoff after an HTTP 429:
/// `base * 2^attempt + jitter`, with `attempt` counted from zero.
pub fn rate_limit_backoff(base_secs: f64, attempt: u32, jitter: f64) -> Duration {
    let secs = base_secs * 2f64.powi(attempt as i32) + jitter;
    Duration::from_secs_f64(secs.max(0.0))
}

/// Uniform jitter in `[0, 1)` seconds.
pub fn jitter() -> f64 {
    rand::random::<f64>()
}
