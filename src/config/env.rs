//! Environment variable configuration
//!
//! `TARGETS_PATH` and `OUTPUT_DIR` are read unprefixed; everything else uses
//! the `UI_LATENCY_` prefix.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "UI_LATENCY";

/// Overrides read from the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Scenario list from TARGETS_PATH
    pub targets_path: Option<PathBuf>,
    /// Artifact directory from OUTPUT_DIR
    pub output_dir: Option<PathBuf>,
    /// Trials from UI_LATENCY_TRIALS
    pub trials: Option<usize>,
    /// Warmup from UI_LATENCY_WARMUP
    pub warmup: Option<bool>,
    /// Capture strategy from UI_LATENCY_STRATEGY
    pub strategy: Option<String>,
    /// Harness from UI_LATENCY_HARNESS
    pub harness: Option<String>,
    /// Config file from UI_LATENCY_CONFIG
    pub config_file: Option<PathBuf>,
    /// Verbose from UI_LATENCY_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from any variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let prefixed = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.is_empty());

        Self {
            targets_path: lookup("TARGETS_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            output_dir: lookup("OUTPUT_DIR").filter(|v| !v.is_empty()).map(PathBuf::from),
            trials: prefixed("TRIALS").and_then(|v| v.parse().ok()),
            warmup: prefixed("WARMUP").map(|v| parse_bool(&v)),
            strategy: prefixed("STRATEGY"),
            harness: prefixed("HARNESS"),
            config_file: prefixed("CONFIG").map(PathBuf::from),
            verbose: prefixed("VERBOSE").map(|v| parse_bool(&v)),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self != &Self::default()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  TARGETS_PATH:         {:?}", self.targets_path);
        println!("  OUTPUT_DIR:           {:?}", self.output_dir);
        println!("  {}_TRIALS:    {:?}", ENV_PREFIX, self.trials);
        println!("  {}_WARMUP:    {:?}", ENV_PREFIX, self.warmup);
        println!("  {}_STRATEGY:  {:?}", ENV_PREFIX, self.strategy);
        println!("  {}_HARNESS:   {:?}", ENV_PREFIX, self.harness);
        println!("  {}_CONFIG:    {:?}", ENV_PREFIX, self.config_file);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_empty_environment() {
        let config = env_from(&[]);
        assert!(!config.has_any());
    }

    #[test]
    fn test_reads_variables() {
        let config = env_from(&[
            ("TARGETS_PATH", "bench/other.json"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("UI_LATENCY_TRIALS", "5"),
            ("UI_LATENCY_WARMUP", "off"),
            ("UI_LATENCY_STRATEGY", "in-page"),
            ("UI_LATENCY_VERBOSE", "yes"),
        ]);

        assert!(config.has_any());
        assert_eq!(config.targets_path, Some(PathBuf::from("bench/other.json")));
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(config.trials, Some(5));
        assert_eq!(config.warmup, Some(false));
        assert_eq!(config.strategy.as_deref(), Some("in-page"));
        assert_eq!(config.verbose, Some(true));
        assert_eq!(config.harness, None);
    }

    #[test]
    fn test_ignores_empty_and_unparsable() {
        let config = env_from(&[("OUTPUT_DIR", ""), ("UI_LATENCY_TRIALS", "many")]);
        assert_eq!(config.output_dir, None);
        assert_eq!(config.trials, None);
    }
}
