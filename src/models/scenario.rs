//! Scenario and trial-class models
//!
//! A scenario is one front-end implementation under test; a trial class is a
//! named variant of the user action (simple vs. complex query).

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::benchmark::SummaryStatistic;

/// CSS selectors the harness needs to perform the user action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    /// Chat input field, e.g. `[data-testid="chat-input"]`
    pub input: String,
    /// Send button
    pub send: String,
    /// Assistant message element
    pub assistant: String,
}

/// Backend endpoint used by the browserless HTTP harness
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEndpoint {
    /// Path relative to the scenario base URL, e.g. `/api/chat`
    pub path: String,
    #[serde(default = "default_endpoint_method")]
    pub method: String,
    /// JSON field the prompt is sent in
    #[serde(default = "default_body_field")]
    pub body_field: String,
}

fn default_endpoint_method() -> String {
    "POST".to_string()
}

fn default_body_field() -> String {
    "message".to_string()
}

/// One UI under test
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub base_url: String,
    /// Pattern of the URLs carrying the chat exchange, e.g. `/api/(chat|runs)`
    pub fetch_regex: String,
    pub selectors: Selectors,
    /// Selectors clicked before every trial when present (mode toggles etc.)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepare: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpEndpoint>,
}

impl Scenario {
    /// Validate name and pattern
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Scenario name must not be empty");
        }
        if self.name.contains(['/', '\\']) {
            anyhow::bail!(
                "Scenario name '{}' must not contain path separators",
                self.name
            );
        }
        if self.base_url.trim().is_empty() {
            anyhow::bail!("Scenario '{}' has an empty baseUrl", self.name);
        }
        Regex::new(&self.fetch_regex).with_context(|| {
            format!(
                "Scenario '{}' has an invalid fetchRegex: {}",
                self.name, self.fetch_regex
            )
        })?;
        Ok(())
    }
}

/// Optional sanity bounds for a class summary
///
/// Only checked when `ttfb_ms` was observed at all.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttfb_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttft_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bytes_total: Option<i64>,
}

impl Expectations {
    /// Human-readable violations, empty when the summary is within bounds
    pub fn check(&self, summary: &SummaryStatistic) -> Vec<String> {
        let mut violations = Vec::new();
        if summary.ttfb_ms <= 0 {
            return violations;
        }

        if let Some(max) = self.max_ttfb_ms {
            if summary.ttfb_ms >= max {
                violations.push(format!("ttfb_ms {} >= {}", summary.ttfb_ms, max));
            }
        }
        if let Some(max) = self.max_ttft_ms {
            if summary.ttft_ms >= max {
                violations.push(format!("ttft_ms {} >= {}", summary.ttft_ms, max));
            }
        }
        if let Some(max) = self.max_ttl_ms {
            if summary.ttl_ms >= max {
                violations.push(format!("ttl_ms {} >= {}", summary.ttl_ms, max));
            }
        }
        if let Some(min) = self.min_bytes_total {
            if summary.bytes_total <= min {
                violations.push(format!("bytes_total {} <= {}", summary.bytes_total, min));
            }
        }
        violations
    }
}

/// Named variant of the user action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialClass {
    /// Short id used in artifact names, e.g. `P1`
    pub id: String,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub expectations: Expectations,
}

impl TrialClass {
    /// Simple query, first token latency
    pub fn simple() -> Self {
        Self {
            id: "P1".to_string(),
            name: "Simple query".to_string(),
            prompt: "Show me Mohamed Salah".to_string(),
            expectations: Expectations {
                max_ttfb_ms: Some(10_000),
                max_ttft_ms: Some(10_000),
                ..Default::default()
            },
        }
    }

    /// Complex query, streaming throughput
    pub fn complex() -> Self {
        Self {
            id: "P2".to_string(),
            name: "Complex query".to_string(),
            prompt: "Show me Mohamed Salah's goals and assists in 2025".to_string(),
            expectations: Expectations {
                max_ttfb_ms: Some(10_000),
                max_ttft_ms: Some(10_000),
                max_ttl_ms: Some(20_000),
                min_bytes_total: Some(50),
            },
        }
    }

    /// Default class set
    pub fn defaults() -> Vec<TrialClass> {
        vec![Self::simple(), Self::complex()]
    }

    /// Class ids become the suffix of `{scenario}-{class}.json`
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.contains(['-', '/', '\\', '.']) {
            anyhow::bail!(
                "Invalid trial class id '{}': must be non-empty without '-', '.', or path separators",
                self.id
            );
        }
        if self.prompt.is_empty() {
            anyhow::bail!("Trial class '{}' has an empty prompt", self.id);
        }
        Ok(())
    }
}

/// Load the ordered scenario list (JSON, or YAML by extension)
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<Scenario>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenarios: {}", path.display()))?;

    let scenarios: Vec<Scenario> = if is_yaml_file(path) {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML scenarios: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON scenarios: {}", path.display()))?
    };

    for scenario in &scenarios {
        scenario.validate()?;
    }
    Ok(scenarios)
}

/// Check if file is YAML based on extension
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TARGETS: &str = r##"[
        {
            "name": "assistant-ui",
            "baseUrl": "http://localhost:3001",
            "fetchRegex": "/api/(chat|threads|runs)",
            "selectors": {
                "input": "[data-testid=\"chat-input\"]",
                "send": "[data-testid=\"send-button\"]",
                "assistant": "[data-testid=\"assistant-msg\"]"
            }
        },
        {
            "name": "custom-next-langchain",
            "baseUrl": "http://localhost:3002",
            "fetchRegex": "/api/nlq",
            "selectors": { "input": "#q", "send": "#go", "assistant": ".answer" },
            "prepare": ["button.nlq-mode"],
            "http": { "path": "/api/nlq" }
        }
    ]"##;

    fn summary_with(ttfb: i64, ttl: i64, bytes: i64) -> SummaryStatistic {
        SummaryStatistic {
            ttfb_ms: ttfb,
            ttft_ms: ttfb,
            ttl_ms: ttl,
            bytes_total: bytes,
            ..SummaryStatistic::unobserved()
        }
    }

    #[test]
    fn test_load_scenarios_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, TARGETS).unwrap();

        let scenarios = load_scenarios(&path).unwrap();
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].name, "assistant-ui");
        assert_eq!(scenarios[0].selectors.send, "[data-testid=\"send-button\"]");
        assert!(scenarios[0].prepare.is_empty());
        assert_eq!(scenarios[1].prepare, vec!["button.nlq-mode".to_string()]);

        let http = scenarios[1].http.as_ref().unwrap();
        assert_eq!(http.method, "POST");
        assert_eq!(http.body_field, "message");
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, TARGETS.replace("/api/nlq", "/api/(nlq")).unwrap();

        assert!(load_scenarios(&path).is_err());
    }

    #[test]
    fn test_trial_class_validation() {
        assert!(TrialClass::simple().validate().is_ok());

        let mut class = TrialClass::simple();
        class.id = "P-1".to_string();
        assert!(class.validate().is_err());
    }

    #[test]
    fn test_expectations_skip_unobserved() {
        let expectations = TrialClass::complex().expectations;
        assert!(expectations.check(&SummaryStatistic::unobserved()).is_empty());
    }

    #[test]
    fn test_expectations_report_violations() {
        let expectations = TrialClass::complex().expectations;

        assert!(expectations.check(&summary_with(300, 4_000, 900)).is_empty());

        let violations = expectations.check(&summary_with(12_000, 25_000, 10));
        assert_eq!(violations.len(), 4);
        assert!(violations[0].starts_with("ttfb_ms"));
    }
}
