//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// UI latency benchmark for chat-style web frontends
#[derive(Parser, Debug)]
#[command(name = "ui-latency-bench")]
#[command(version)]
#[command(about = "Measure time-to-first-byte, first token, last byte and render of chat UIs")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run warmup and measured trials for every scenario and trial class
    Run(RunArgs),

    /// Rebuild results.json / results.md from stored artifacts
    Aggregate(AggregateArgs),

    /// Summarize a JSON array of metric records
    Summarize(SummarizeArgs),

    /// List scenarios and trial classes
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Scenario list (JSON or YAML)
    #[arg(short, long)]
    pub targets: Option<PathBuf>,

    /// Artifact directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Capture strategy (in-page, out-of-page)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Measured trials per scenario and class
    #[arg(short = 'n', long)]
    pub trials: Option<usize>,

    /// Only run these trial classes (repeatable)
    #[arg(long = "class")]
    pub classes: Vec<String>,

    /// Only run these scenarios (repeatable)
    #[arg(long = "scenario")]
    pub scenarios: Vec<String>,

    /// Harness driving the page (replay, http)
    #[arg(long)]
    pub harness: Option<String>,

    /// Replay script for the replay harness
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Skip the warmup trial
    #[arg(long)]
    pub no_warmup: bool,

    /// Output format for the aggregate table (table, markdown, json, json-pretty, csv)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for aggregate command
#[derive(Parser, Debug)]
pub struct AggregateArgs {
    /// Artifact directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (table, markdown, json, json-pretty, csv)
    #[arg(short, long, default_value = "markdown")]
    pub format: String,
}

/// Arguments for summarize command
#[derive(Parser, Debug)]
pub struct SummarizeArgs {
    /// JSON file holding an array of metric records
    pub file: PathBuf,

    /// Print pretty JSON instead of a one-line summary
    #[arg(long)]
    pub json: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Scenario list (JSON or YAML)
    #[arg(short, long)]
    pub targets: Option<PathBuf>,

    /// Show selectors and endpoints
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination
        #[arg(default_value = "ui-latency-bench.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "ui-latency-bench",
            "run",
            "--strategy",
            "in-page",
            "-n",
            "5",
            "--class",
            "P1",
            "--class",
            "P2",
            "--scenario",
            "assistant-ui",
            "--no-warmup",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.strategy.as_deref(), Some("in-page"));
                assert_eq!(run.trials, Some(5));
                assert_eq!(run.classes, vec!["P1", "P2"]);
                assert_eq!(run.scenarios, vec!["assistant-ui"]);
                assert!(run.no_warmup);
                assert_eq!(run.format, "table");
                assert!(run.targets.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Args::parse_from([
            "ui-latency-bench",
            "aggregate",
            "--format",
            "csv",
            "-v",
            "--config",
            "bench.yaml",
        ]);
        assert!(args.verbose);
        assert!(!args.quiet);
        assert_eq!(args.config, Some(PathBuf::from("bench.yaml")));
        match args.command {
            Command::Aggregate(agg) => assert_eq!(agg.format, "csv"),
            _ => panic!("Expected Aggregate command"),
        }
    }

    #[test]
    fn test_summarize_requires_file() {
        assert!(Args::try_parse_from(["ui-latency-bench", "summarize"]).is_err());
        let args = Args::parse_from(["ui-latency-bench", "summarize", "records.json"]);
        match args.command {
            Command::Summarize(s) => assert_eq!(s.file, PathBuf::from("records.json")),
            _ => panic!("Expected Summarize command"),
        }
    }

    #[test]
    fn test_config_init_default_path() {
        let args = Args::parse_from(["ui-latency-bench", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("ui-latency-bench.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
