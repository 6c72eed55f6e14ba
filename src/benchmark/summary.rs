//! Trial set summarization
//!
//! Reduces the records of one scenario/class into mean and median per field.
//! Only strictly positive values count; `-1` (not observed) and `0` are no data.
//! Means and medians round half away from zero, so `112.5` becomes `113`.

use serde::{Deserialize, Serialize};

use crate::models::{MetricField, MetricRecord, TrialSet, SENTINEL};

/// Mean and median of one field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub mean: i64,
    pub median: i64,
}

impl FieldSummary {
    pub const UNOBSERVED: FieldSummary = FieldSummary {
        mean: SENTINEL,
        median: SENTINEL,
    };
}

/// Summary of a trial set, serialized flat as in the stored artifacts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStatistic {
    pub ttfb_ms: i64,
    pub ttfb_ms_median: i64,
    pub ttft_ms: i64,
    pub ttft_ms_median: i64,
    pub ttl_ms: i64,
    pub ttl_ms_median: i64,
    pub render_ms: i64,
    pub render_ms_median: i64,
    pub bytes_total: i64,
    pub bytes_total_median: i64,
}

impl SummaryStatistic {
    /// Summary with every field at the sentinel
    pub fn unobserved() -> Self {
        Self {
            ttfb_ms: SENTINEL,
            ttfb_ms_median: SENTINEL,
            ttft_ms: SENTINEL,
            ttft_ms_median: SENTINEL,
            ttl_ms: SENTINEL,
            ttl_ms_median: SENTINEL,
            render_ms: SENTINEL,
            render_ms_median: SENTINEL,
            bytes_total: SENTINEL,
            bytes_total_median: SENTINEL,
        }
    }

    pub fn get(&self, field: MetricField) -> FieldSummary {
        let (mean, median) = match field {
            MetricField::TtfbMs => (self.ttfb_ms, self.ttfb_ms_median),
            MetricField::TtftMs => (self.ttft_ms, self.ttft_ms_median),
            MetricField::TtlMs => (self.ttl_ms, self.ttl_ms_median),
            MetricField::RenderMs => (self.render_ms, self.render_ms_median),
            MetricField::BytesTotal => (self.bytes_total, self.bytes_total_median),
        };
        FieldSummary { mean, median }
    }

    fn set(&mut self, field: MetricField, summary: FieldSummary) {
        let (mean, median) = match field {
            MetricField::TtfbMs => (&mut self.ttfb_ms, &mut self.ttfb_ms_median),
            MetricField::TtftMs => (&mut self.ttft_ms, &mut self.ttft_ms_median),
            MetricField::TtlMs => (&mut self.ttl_ms, &mut self.ttl_ms_median),
            MetricField::RenderMs => (&mut self.render_ms, &mut self.render_ms_median),
            MetricField::BytesTotal => (&mut self.bytes_total, &mut self.bytes_total_median),
        };
        *mean = summary.mean;
        *median = summary.median;
    }

    /// Format as summary string
    pub fn format_summary(&self) -> String {
        MetricField::ALL
            .iter()
            .map(|f| {
                let s = self.get(*f);
                format!("{}={}/{}", f.short_name(), s.mean, s.median)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for SummaryStatistic {
    fn default() -> Self {
        Self::unobserved()
    }
}

/// Summarize one field's values
pub fn summarize_field(values: impl IntoIterator<Item = i64>) -> FieldSummary {
    let mut observed: Vec<i64> = values.into_iter().filter(|v| *v > 0).collect();
    if observed.is_empty() {
        return FieldSummary::UNOBSERVED;
    }
    observed.sort_unstable();

    let count = observed.len();
    let sum: i64 = observed.iter().sum();
    let mean = round_half_up(sum as f64 / count as f64);

    let mid = count / 2;
    let median = if count % 2 == 0 {
        round_half_up((observed[mid - 1] + observed[mid]) as f64 / 2.0)
    } else {
        observed[mid]
    };

    FieldSummary { mean, median }
}

/// Summarize every field of a record slice independently
pub fn summarize(records: &[MetricRecord]) -> SummaryStatistic {
    let mut summary = SummaryStatistic::unobserved();
    for field in MetricField::ALL {
        summary.set(field, summarize_field(records.iter().map(|r| r.get(field))));
    }
    summary
}

/// Summarize a trial set
pub fn summarize_set(set: &TrialSet) -> SummaryStatistic {
    summarize(&set.records)
}

fn round_half_up(value: f64) -> i64 {
    value.round() as i64
}
