//! Aggregate report generation
//!
//! Combines the per-key summaries of every scenario into one table and
//! renders it in various output formats.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::summary::SummaryStatistic;
use crate::models::MetricField;

/// Report output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Plain text table
    Text,
    /// JSON format
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Markdown format
    Markdown,
    /// CSV format
    Csv,
}

impl ReportFormat {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "table" => Some(Self::Text),
            "json" => Some(Self::Json),
            "json-pretty" => Some(Self::JsonPretty),
            "markdown" | "md" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// One scenario with its summary per trial class
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub name: String,
    pub classes: BTreeMap<String, SummaryStatistic>,
}

/// All stored summaries, one row per scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateTable {
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            rows: Vec::new(),
        }
    }

    /// Add one stored summary, keeping rows in first-seen order
    pub fn insert(&mut self, scenario: &str, class: &str, summary: SummaryStatistic) {
        let index = match self.rows.iter().position(|r| r.name == scenario) {
            Some(index) => index,
            None => {
                self.rows.push(AggregateRow {
                    name: scenario.to_string(),
                    classes: BTreeMap::new(),
                });
                self.rows.len() - 1
            }
        };
        self.rows[index].classes.insert(class.to_string(), summary);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every class id present in any row, sorted
    pub fn class_ids(&self) -> Vec<String> {
        let ids: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.classes.keys()).collect();
        ids.into_iter().cloned().collect()
    }

    fn columns(&self) -> Vec<(String, MetricField)> {
        self.class_ids()
            .into_iter()
            .flat_map(|class| MetricField::ALL.into_iter().map(move |f| (class.clone(), f)))
            .collect()
    }

    fn cells(&self, row: &AggregateRow) -> Vec<String> {
        self.columns()
            .iter()
            .map(|(class, field)| {
                row.classes
                    .get(class)
                    .map(|s| s.get(*field).mean.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Render in the requested format
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => {
                serde_json::to_string(self).context("Failed to serialize aggregate table")
            }
            ReportFormat::JsonPretty => {
                serde_json::to_string_pretty(self).context("Failed to serialize aggregate table")
            }
            ReportFormat::Markdown => Ok(self.to_markdown()),
            ReportFormat::Csv => self.to_csv(),
        }
    }

    /// Markdown table, the `results.md` layout
    pub fn to_markdown(&self) -> String {
        let mut output = String::from("# UI Latency Bench Results\n\n");
        let columns = self.columns();

        output.push_str("| UI |");
        for (class, field) in &columns {
            output.push_str(&format!(" {} {} |", class, field.short_name()));
        }
        output.push('\n');
        output.push_str("|---|");
        output.push_str(&"---:|".repeat(columns.len()));
        output.push('\n');

        for row in &self.rows {
            output.push_str(&format!("| {} |", row.name));
            for cell in self.cells(row) {
                output.push_str(&format!(" {} |", cell));
            }
            output.push('\n');
        }

        output.push_str(&format!(
            "\n_Generated at {}. Values are means in ms (bytes for bytes); -1 means not observed._\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output
    }

    /// Aligned plain-text table
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{:=^78}\n", " UI Latency Bench Results "));

        if self.rows.is_empty() {
            output.push_str("\nNo artifacts found.\n");
            output.push_str(&format!("\n{:=^78}\n", ""));
            return output;
        }

        let width = self
            .rows
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        for class in self.class_ids() {
            output.push_str(&format!("\n{}:\n", class));
            output.push_str(&format!("  {:<width$}", "UI", width = width));
            for field in MetricField::ALL {
                output.push_str(&format!(" {:>10}", field.short_name()));
            }
            output.push('\n');
            output.push_str(&format!("  {}\n", "-".repeat(width + 11 * MetricField::ALL.len())));

            for row in &self.rows {
                let Some(summary) = row.classes.get(&class) else {
                    continue;
                };
                output.push_str(&format!("  {:<width$}", row.name, width = width));
                for field in MetricField::ALL {
                    output.push_str(&format!(" {:>10}", summary.get(field).mean));
                }
                output.push('\n');
            }
        }

        output.push_str(&format!("\n{:=^78}\n", ""));
        output
    }

    /// CSV with one line per scenario and class
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "scenario",
            "class",
            "ttfb_ms",
            "ttfb_ms_median",
            "ttft_ms",
            "ttft_ms_median",
            "ttl_ms",
            "ttl_ms_median",
            "render_ms",
            "render_ms_median",
            "bytes_total",
            "bytes_total_median",
        ])?;

        for row in &self.rows {
            for (class, summary) in &row.classes {
                let mut record = vec![row.name.clone(), class.clone()];
                for field in MetricField::ALL {
                    let stats = summary.get(field);
                    record.push(stats.mean.to_string());
                    record.push(stats.median.to_string());
                }
                writer.write_record(&record)?;
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e))?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }
}

impl Default for AggregateTable {
    fn default() -> Self {
        Self::new()
    }
}
