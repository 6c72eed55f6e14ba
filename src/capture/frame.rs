//! Paint frame source

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Default display refresh interval (60 Hz)
pub const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Resolves on the page's next paint frame
#[async_trait]
pub trait FrameClock: Send + Sync {
    async fn next_frame(&self);
}

/// Fixed-rate frame grid anchored at creation
#[derive(Clone, Debug)]
pub struct IntervalFrameClock {
    origin: Instant,
    interval: Duration,
}

impl IntervalFrameClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval,
        }
    }

    /// First grid boundary strictly after `now`
    pub fn next_boundary(&self, now: Instant) -> Instant {
        let interval = self.interval.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        let frames = elapsed / interval + 1;
        let offset = frames.saturating_mul(interval);
        self.origin + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
    }
}

impl Default for IntervalFrameClock {
    fn default() -> Self {
        Self::new(FRAME_INTERVAL)
    }
}

#[async_trait]
impl FrameClock for IntervalFrameClock {
    async fn next_frame(&self) {
        sleep_until(self.next_boundary(Instant::now())).await;
    }
}
