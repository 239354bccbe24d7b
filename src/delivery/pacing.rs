//! Inter-fragment pacing.

use std::time::Duration;

use rand::Rng;

/// Gap between consecutive fragment sends.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    pub interval: Duration,
    /// Symmetric jitter as a fraction of `interval` (0.0 disables it).
    pub jitter_factor: f64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter_factor: 0.0,
        }
    }
}

impl Pacing {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter_factor: 0.0,
        }
    }

    /// No waiting at all.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Delay before sending the fragment at 0-based `position`.
    ///
    /// The first fragment goes out immediately.
    pub fn delay_before(&self, position: usize) -> Duration {
        if position == 0 || self.interval.is_zero() {
            return Duration::ZERO;
        }

        let base_ms = self.interval.as_millis() as f64;
        let jitter_range = base_ms * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }

    pub async fn wait_before(&self, position: usize) {
        let delay = self.delay_before(position);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
