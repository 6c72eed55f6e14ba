//! Data models for latency benchmarking
//!
//! This module contains the metric records and scenario descriptions used
//! throughout the application.

mod metric;
mod scenario;

pub use metric::{
    to_record_value, MetricField, MetricRecord, MetricSample, TrialSet, SENTINEL,
};
pub use scenario::{is_yaml_file, load_scenarios, HttpEndpoint, Scenario, TrialClass};
