//! Timer utilities
//!
//! Provides the clock every capture path stamps its events with, and a
//! labelled timer for coarse wall-time logging.

use std::time::Duration;
use tokio::time::Instant;

/// Millisecond time source shared by a harness and the observers attached to it.
///
/// Request/response events and payload completion must be stamped by the same
/// clock, otherwise the derived elapsed times are meaningless.
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock's origin
    fn now_ms(&self) -> f64;
}

/// Monotonic clock anchored at creation.
///
/// Built on `tokio::time::Instant` so paused-time tests advance it
/// deterministically.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Clock origin
    #[cfg(test)]
    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.now_ms(), 0.0);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!((clock.now_ms() - 250.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer() {
        let timer = Timer::start("test");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
