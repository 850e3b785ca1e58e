//! Per-session average-throughput limiter.

use std::time::Duration;

use tokio::time::Instant;

/// Bounds the average outbound rate of one session.
///
/// Not a token bucket: bursts pass, and the session pauses a fixed interval
/// whenever the running average exceeds the limit.
#[derive(Debug)]
pub struct BandwidthThrottle {
    limit: Option<u64>,
    pause: Duration,
    session_start: Instant,
    bytes: u64,
}

impl BandwidthThrottle {
    pub fn new(limit: Option<u64>, pause: Duration) -> Self {
        Self {
            limit,
            pause,
            session_start: Instant::now(),
            bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.bytes = self.bytes.saturating_add(bytes);
    }

    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes
    }

    /// True when bytes per elapsed second exceed the limit
    pub fn should_throttle(&self) -> bool {
        let Some(limit) = self.limit else {
            return false;
        };
        let elapsed_ms = u64::try_from(self.session_start.elapsed().as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        u128::from(self.bytes) * 1_000 > u128::from(limit) * u128::from(elapsed_ms)
    }

    /// Sleep for the pause interval when over the limit; reports whether it did
    pub async fn pause_if_needed(&self) -> bool {
        if !self.should_throttle() {
            return false;
        }
        tracing::debug!(
            bytes = self.bytes,
            pause_ms = self.pause.as_millis(),
            "Bandwidth limit exceeded; pausing"
        );
        tokio::time::sleep(self.pause).await;
        true
    }
}
