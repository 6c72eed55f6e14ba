//! Metric models
//!
//! Raw in-page samples, finalized per-trial records and the trial set a
//! summary is computed from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// "Not observed" marker for every numeric metric field
pub const SENTINEL: i64 = -1;

/// Numeric fields of a [`MetricRecord`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    TtfbMs,
    TtftMs,
    TtlMs,
    RenderMs,
    BytesTotal,
}

impl MetricField {
    pub const ALL: [MetricField; 5] = [
        MetricField::TtfbMs,
        MetricField::TtftMs,
        MetricField::TtlMs,
        MetricField::RenderMs,
        MetricField::BytesTotal,
    ];

    /// Artifact / sample key, e.g. `ttfb_ms`
    pub fn key(&self) -> &'static str {
        match self {
            MetricField::TtfbMs => "ttfb_ms",
            MetricField::TtftMs => "ttft_ms",
            MetricField::TtlMs => "ttl_ms",
            MetricField::RenderMs => "render_ms",
            MetricField::BytesTotal => "bytes_total",
        }
    }

    /// Short column heading
    pub fn short_name(&self) -> &'static str {
        match self {
            MetricField::TtfbMs => "ttfb",
            MetricField::TtftMs => "ttft",
            MetricField::TtlMs => "ttl",
            MetricField::RenderMs => "render",
            MetricField::BytesTotal => "bytes",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Raw timestamped event emitted by the in-page interceptor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// `{label}:{name}`, e.g. `chat:ttfb_ms`
    pub metric: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Wall-clock epoch milliseconds
    pub ts: i64,
}

/// Finalized metrics of one trial
///
/// Every numeric field is a non-negative value or [`SENTINEL`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub ttfb_ms: i64,
    pub ttft_ms: i64,
    pub ttl_ms: i64,
    pub render_ms: i64,
    pub bytes_total: i64,
    pub url: String,
}

impl MetricRecord {
    /// Record with nothing observed, produced on timeout
    pub fn unobserved() -> Self {
        Self {
            ttfb_ms: SENTINEL,
            ttft_ms: SENTINEL,
            ttl_ms: SENTINEL,
            render_ms: SENTINEL,
            bytes_total: SENTINEL,
            url: String::new(),
        }
    }

    pub fn get(&self, field: MetricField) -> i64 {
        match field {
            MetricField::TtfbMs => self.ttfb_ms,
            MetricField::TtftMs => self.ttft_ms,
            MetricField::TtlMs => self.ttl_ms,
            MetricField::RenderMs => self.render_ms,
            MetricField::BytesTotal => self.bytes_total,
        }
    }

    pub fn set(&mut self, field: MetricField, value: i64) {
        let slot = match field {
            MetricField::TtfbMs => &mut self.ttfb_ms,
            MetricField::TtftMs => &mut self.ttft_ms,
            MetricField::TtlMs => &mut self.ttl_ms,
            MetricField::RenderMs => &mut self.render_ms,
            MetricField::BytesTotal => &mut self.bytes_total,
        };
        *slot = value;
    }

    /// True when no numeric field was observed
    pub fn is_unobserved(&self) -> bool {
        MetricField::ALL.iter().all(|f| self.get(*f) == SENTINEL)
    }

    /// Format as a one-line summary
    pub fn format_summary(&self) -> String {
        format!(
            "ttfb={}ms ttft={}ms ttl={}ms render={}ms bytes={} url={}",
            self.ttfb_ms,
            self.ttft_ms,
            self.ttl_ms,
            self.render_ms,
            self.bytes_total,
            if self.url.is_empty() { "-" } else { &self.url }
        )
    }
}

impl Default for MetricRecord {
    fn default() -> Self {
        Self::unobserved()
    }
}

/// Convert a fractional millisecond / byte measurement to a record value.
///
/// Negative and non-finite inputs cannot be observations and map to the sentinel.
pub fn to_record_value(value: f64) -> i64 {
    if value.is_finite() && value >= 0.0 {
        value.round() as i64
    } else {
        SENTINEL
    }
}

/// Measured records of one scenario and trial class, warmup excluded
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrialSet {
    pub scenario: String,
    pub class: String,
    pub records: Vec<MetricRecord>,
}

impl TrialSet {
    pub fn new(scenario: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            class: class.into(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: MetricRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unobserved_record() {
        let record = MetricRecord::unobserved();
        assert!(record.is_unobserved());
        assert!(record.url.is_empty());
        for field in MetricField::ALL {
            assert_eq!(record.get(field), SENTINEL);
        }
    }

    #[test]
    fn test_record_set_get() {
        let mut record = MetricRecord::unobserved();
        record.set(MetricField::TtlMs, 420);
        assert_eq!(record.ttl_ms, 420);
        assert!(!record.is_unobserved());
    }

    #[test]
    fn test_to_record_value() {
        assert_eq!(to_record_value(12.4), 12);
        assert_eq!(to_record_value(12.5), 13);
        assert_eq!(to_record_value(0.0), 0);
        assert_eq!(to_record_value(-3.0), SENTINEL);
        assert_eq!(to_record_value(f64::NAN), SENTINEL);
    }

    #[test]
    fn test_metric_field_keys() {
        assert_eq!(MetricField::TtfbMs.key(), "ttfb_ms");
        assert_eq!(MetricField::BytesTotal.key(), "bytes_total");
        assert_eq!(MetricField::BytesTotal.short_name(), "bytes");
        assert_eq!(MetricField::RenderMs.to_string(), "render_ms");
    }

    #[test]
    fn test_record_serializes_with_artifact_field_names() {
        let record = MetricRecord {
            ttfb_ms: 120,
            ttft_ms: 120,
            ttl_ms: 900,
            render_ms: 16,
            bytes_total: 2048,
            url: "http://localhost:3000/api/chat".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ttfb_ms"], 120);
        assert_eq!(json["bytes_total"], 2048);
        assert_eq!(json["url"], "http://localhost:3000/api/chat");
    }

    #[test]
    fn test_trial_set_keeps_trial_order() {
        let mut set = TrialSet::new("assistant-ui", "P1");
        let mut a = MetricRecord::unobserved();
        a.ttfb_ms = 100;
        set.push(a);
        set.push(MetricRecord::unobserved());

        assert_eq!(set.len(), 2);
        assert_eq!(set.records[0].ttfb_ms, 100);
        assert!(set.records[1].is_unobserved());
    }
}
