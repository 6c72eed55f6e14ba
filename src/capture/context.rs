//! Per-trial sample buffer
//!
//! Created by the runner for each in-page trial, shared with the interceptor
//! and dropped once the trial's record has been finalized.

use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::trace;

use crate::models::{to_record_value, MetricField, MetricRecord, MetricSample};
use crate::utils::{Clock, MonotonicClock};

/// Sample names emitted besides the metric fields
pub const SUBMIT: &str = "submit";
pub const ERROR: &str = "error";

/// Shared, append-only buffer of one trial's samples
#[derive(Clone)]
pub struct TrialContext {
    inner: Arc<Inner>,
}

struct Inner {
    samples: Mutex<Vec<MetricSample>>,
    updates: watch::Sender<usize>,
    clock: MonotonicClock,
}

impl TrialContext {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }

    pub fn with_clock(clock: MonotonicClock) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                samples: Mutex::new(Vec::new()),
                updates,
                clock,
            }),
        }
    }

    /// Monotonic milliseconds since the context was created
    pub fn now_ms(&self) -> f64 {
        self.inner.clock.now_ms()
    }

    /// Append a sample named `metric`, stamped with wall-clock time
    pub fn record(&self, metric: impl Into<String>, value: f64, meta: Option<Value>) {
        let sample = MetricSample {
            metric: metric.into(),
            value,
            meta,
            ts: Utc::now().timestamp_millis(),
        };
        trace!(metric = %sample.metric, value = sample.value, "Sample recorded");

        let len = {
            let mut samples = self.lock();
            samples.push(sample);
            samples.len()
        };
        self.inner.updates.send_replace(len);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Most recent sample with this exact name
    pub fn latest(&self, metric: &str) -> Option<MetricSample> {
        self.lock().iter().rev().find(|s| s.metric == metric).cloned()
    }

    /// Resolve once any of `metrics` has been recorded; returns its name
    pub async fn wait_for_any(&self, metrics: &[String]) -> String {
        let mut rx = self.inner.updates.subscribe();
        loop {
            if let Some(found) = self.find_any(metrics) {
                return found;
            }
            // The sender lives in `self`, so `changed` cannot fail here
            if rx.changed().await.is_err() {
                return String::new();
            }
        }
    }

    fn find_any(&self, metrics: &[String]) -> Option<String> {
        let samples = self.lock();
        samples
            .iter()
            .rev()
            .find(|s| metrics.iter().any(|m| *m == s.metric))
            .map(|s| s.metric.clone())
    }

    /// Reduce the buffer into one record for `label`
    ///
    /// Takes the most recent sample of each `{label}:{field}`; missing fields
    /// stay at the sentinel. The URL comes from the latest submit sample.
    pub fn finalize(&self, label: &str) -> MetricRecord {
        let mut record = MetricRecord::unobserved();
        for field in MetricField::ALL {
            if let Some(sample) = self.latest(&sample_name(label, field.key())) {
                record.set(field, to_record_value(sample.value));
            }
        }

        record.url = self
            .latest(&sample_name(label, SUBMIT))
            .and_then(|s| s.meta)
            .and_then(|m| m.get("url").and_then(|u| u.as_str()).map(String::from))
            .unwrap_or_default();
        record
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MetricSample>> {
        // A panic while holding the lock leaves the buffer intact
        self.inner
            .samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TrialContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `{label}:{name}`
pub fn sample_name(label: &str, name: &str) -> String {
    format!("{label}:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SENTINEL;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_finalize_empty_is_unobserved() {
        let ctx = TrialContext::new();
        assert_eq!(ctx.finalize("chat"), MetricRecord::unobserved());
    }

    #[test]
    fn test_finalize_takes_latest_sample() {
        let ctx = TrialContext::new();
        ctx.record("chat:submit", 0.0, Some(json!({"url": "http://a/api/chat", "method": "POST"})));
        ctx.record("chat:ttfb_ms", 120.4, None);
        ctx.record("chat:ttfb_ms", 99.5, None);
        ctx.record("chat:ttl_ms", 880.0, None);
        ctx.record("other:ttft_ms", 5.0, None);

        let record = ctx.finalize("chat");
        assert_eq!(record.ttfb_ms, 100);
        assert_eq!(record.ttl_ms, 880);
        assert_eq!(record.ttft_ms, SENTINEL);
        assert_eq!(record.render_ms, SENTINEL);
        assert_eq!(record.url, "http://a/api/chat");
    }

    #[test]
    fn test_finalize_url_from_latest_submit() {
        let ctx = TrialContext::new();
        ctx.record("chat:submit", 0.0, Some(json!({"url": "http://a/first"})));
        ctx.record("chat:submit", 0.0, Some(json!({"url": "http://a/second"})));

        assert_eq!(ctx.finalize("chat").url, "http://a/second");
    }

    #[test]
    fn test_samples_are_wall_clock_stamped() {
        let ctx = TrialContext::new();
        let before = Utc::now().timestamp_millis();
        ctx.record("chat:ttfb_ms", 1.0, None);

        let sample = ctx.latest("chat:ttfb_ms").unwrap();
        assert!(sample.ts >= before);
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_any() {
        let ctx = TrialContext::new();
        let writer = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.record("chat:ttfb_ms", 10.0, None);
            writer.record("chat:error", 0.0, None);
        });

        let wanted = vec!["chat:render_ms".to_string(), "chat:error".to_string()];
        let found = ctx.wait_for_any(&wanted).await;
        assert_eq!(found, "chat:error");
    }

    #[tokio::test]
    async fn test_wait_for_any_already_recorded() {
        let ctx = TrialContext::new();
        ctx.record("chat:render_ms", 16.0, None);

        let found = ctx.wait_for_any(&["chat:render_ms".to_string()]).await;
        assert_eq!(found, "chat:render_ms");
    }
}
