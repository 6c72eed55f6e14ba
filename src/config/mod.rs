//! Configuration module
//!
//! Handles loading and managing configuration. Precedence, lowest first:
//! built-in defaults, the config file, environment variables, CLI flags.

mod env;

pub use env::EnvConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::benchmark::{CaptureStrategy, RunSettings};
use crate::harness::{HarnessKind, NetworkConditions};
use crate::models::{is_yaml_file, TrialClass};

/// Default configuration file locations
const CONFIG_LOCATIONS: &[&str] = &[
    "ui-latency-bench.yaml",
    "ui-latency-bench.yml",
    "ui-latency-bench.json",
    "~/.config/ui-latency-bench/config.yaml",
    "~/.ui-latency-bench.yaml",
];

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Config version
    pub version: String,

    /// Ordered scenario list
    pub targets_path: PathBuf,

    /// Artifact directory
    pub output_dir: PathBuf,

    pub harness: HarnessKind,

    /// Replay script; a demo page is synthesized per scenario when unset
    pub replay_script: Option<PathBuf>,

    /// HTTP timeout in seconds for the browserless harness
    pub http_timeout_secs: u64,

    /// Network emulation applied by the replay harness
    pub network: Option<NetworkConditions>,

    pub run: RunSettings,

    /// Trial classes run for every scenario
    pub classes: Vec<TrialClass>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            targets_path: PathBuf::from("bench/targets.json"),
            output_dir: PathBuf::from("artifacts"),
            harness: HarnessKind::default(),
            replay_script: None,
            http_timeout_secs: 60,
            network: Some(NetworkConditions::default()),
            run: RunSettings::default(),
            classes: TrialClass::defaults(),
        }
    }
}

impl BenchConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from an explicit path, a standard location, or defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }
        if self.run.trials == 0 {
            anyhow::bail!("trials must be at least 1");
        }
        if self.run.label.is_empty() || self.run.label.contains(':') {
            anyhow::bail!("Invalid sample label '{}'", self.run.label);
        }
        if self.run.observer.trial_timeout_ms == 0 {
            anyhow::bail!("trial_timeout_ms must be positive");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be positive");
        }
        if self.classes.is_empty() {
            anyhow::bail!("At least one trial class is required");
        }

        let mut seen = BTreeSet::new();
        for class in &self.classes {
            class.validate()?;
            if !seen.insert(class.id.as_str()) {
                anyhow::bail!("Duplicate trial class id '{}'", class.id);
            }
        }
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(path) = &env.targets_path {
            self.targets_path = path.clone();
        }
        if let Some(dir) = &env.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(trials) = env.trials {
            self.run.trials = trials;
        }
        if let Some(warmup) = env.warmup {
            self.run.warmup = warmup;
        }
        if let Some(value) = &env.strategy {
            match CaptureStrategy::from_str(value) {
                Some(strategy) => self.run.strategy = strategy,
                None => warn!(value = %value, "Ignoring unknown UI_LATENCY_STRATEGY"),
            }
        }
        if let Some(value) = &env.harness {
            match HarnessKind::from_str(value) {
                Some(kind) => self.harness = kind,
                None => warn!(value = %value, "Ignoring unknown UI_LATENCY_HARNESS"),
            }
        }
    }

    /// Classes with the given ids, in config order; all classes when `ids` is empty
    pub fn select_classes(&self, ids: &[String]) -> Result<Vec<TrialClass>> {
        if ids.is_empty() {
            return Ok(self.classes.clone());
        }
        for id in ids {
            if !self.classes.iter().any(|c| c.id.eq_ignore_ascii_case(id)) {
                anyhow::bail!("Unknown trial class '{}'", id);
            }
        }
        Ok(self
            .classes
            .iter()
            .filter(|c| ids.iter().any(|id| c.id.eq_ignore_ascii_case(id)))
            .cloned()
            .collect())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut config = Self::default();
        config.run.trials = 5;
        config.run.strategy = CaptureStrategy::InPage;
        config
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.targets_path, PathBuf::from("bench/targets.json"));
        assert_eq!(config.output_dir, PathBuf::from("artifacts"));
        assert_eq!(config.run.trials, 3);
        assert!(config.run.warmup);
        assert_eq!(config.run.observer.settle_delay_ms, 3000);
        assert_eq!(config.run.observer.trial_timeout_ms, 45_000);
        assert_eq!(config.run.timing.page_settle_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        let config = BenchConfig::example();

        for name in ["bench.yaml", "nested/bench.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            assert_eq!(BenchConfig::load(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.yaml");
        std::fs::write(
            &path,
            "output_dir: out\nrun:\n  trials: 7\n  strategy: in-page\n  observer:\n    settle_delay_ms: 1500\n",
        )
        .unwrap();

        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.run.trials, 7);
        assert_eq!(config.run.strategy, CaptureStrategy::InPage);
        assert_eq!(config.run.observer.settle_delay_ms, 1500);
        assert_eq!(config.run.observer.trial_timeout_ms, 45_000);
        assert_eq!(config.classes.len(), 2);
    }

    #[test]
    fn test_validate_config() {
        let mut config = BenchConfig::default();
        config.run.trials = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.classes.push(TrialClass::simple());
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.run.label = "chat:v2".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env() {
        let mut config = BenchConfig::default();
        let env = EnvConfig {
            output_dir: Some(PathBuf::from("/tmp/out")),
            trials: Some(9),
            strategy: Some("in-page".to_string()),
            harness: Some("bogus".to_string()),
            ..Default::default()
        };

        config.apply_env(&env);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.run.trials, 9);
        assert_eq!(config.run.strategy, CaptureStrategy::InPage);
        assert_eq!(config.harness, HarnessKind::Replay);
    }

    #[test]
    fn test_select_classes() {
        let config = BenchConfig::default();
        assert_eq!(config.select_classes(&[]).unwrap().len(), 2);

        let selected = config.select_classes(&["p2".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "P2");

        assert!(config.select_classes(&["P9".to_string()]).is_err());
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("bench.yaml"), PathBuf::from("bench.yaml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.yaml"), home.join("x.yaml"));
        }
    }
}
