//! Trial orchestration and summary statistics
//!
//! Runs repeated trials of each scenario, reduces them to robust summaries
//! and renders the combined results table.

mod report;
mod runner;
mod summary;

pub use report::{AggregateTable, ReportFormat};
pub use runner::{CaptureStrategy, RunSettings, ScenarioOutcome, TrialRunner};
pub use summary::{summarize, SummaryStatistic};
