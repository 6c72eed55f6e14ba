//! UI Latency Bench - perceived latency of conversational web UIs
//!
//! Drives each configured chat frontend through a warmup trial and N measured
//! trials per prompt class, timing every trial with one of two capture
//! strategies, and writes robust summaries per scenario and class.
//!
//! ## Metrics
//!
//! - `ttfb_ms`: submit to first response byte
//! - `ttft_ms`: submit to first body chunk
//! - `ttl_ms`: submit to last byte
//! - `render_ms`: last byte to the next paint
//! - `bytes_total`: body size
//!
//! ## Usage
//!
//! ```bash
//! # Run every scenario in bench/targets.json against the replay harness
//! ui-latency-bench run
//!
//! # Time in-page, 5 trials, only the simple prompt
//! ui-latency-bench run --strategy in-page -n 5 --class P1
//!
//! # Drive the backends directly over HTTP
//! ui-latency-bench run --harness http
//!
//! # Rebuild the combined table
//! ui-latency-bench aggregate --format markdown
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{error, info, warn};

mod benchmark;
mod capture;
mod cli;
mod config;
mod harness;
mod models;
mod results;
mod utils;

use benchmark::{
    summarize, CaptureStrategy, ReportFormat, RunSettings, ScenarioOutcome, TrialRunner,
};
use cli::{Args, Command, ConfigAction};
use config::{BenchConfig, EnvConfig};
use harness::{HarnessKind, HttpHarness, ReplayHarness, ReplayScript, UiHarness};
use models::{load_scenarios, MetricRecord, Scenario, TrialClass};
use results::ArtifactStore;
use utils::{init_logger, Verbosity};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let verbose = args.verbose || env.verbose.unwrap_or(false);
    init_logger(Verbosity::from_flags(verbose, args.quiet));

    let config_path = args.config.clone().or_else(|| env.config_file.clone());
    let mut config = BenchConfig::resolve(config_path.as_deref())?;
    config.apply_env(&env);

    match args.command {
        Command::Run(run_args) => run(run_args, config).await?,
        Command::Aggregate(aggregate_args) => aggregate(aggregate_args, &config)?,
        Command::Summarize(summarize_args) => summarize_file(summarize_args)?,
        Command::List(list_args) => list(list_args, &config)?,
        Command::Config(config_args) => manage_config(config_args.action, &config, &env)?,
    }

    Ok(())
}

async fn run(args: cli::RunArgs, mut config: BenchConfig) -> Result<()> {
    if let Some(targets) = args.targets {
        config.targets_path = targets;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(value) = &args.strategy {
        config.run.strategy = CaptureStrategy::from_str(value)
            .ok_or_else(|| anyhow::anyhow!("Unknown capture strategy: {value}"))?;
    }
    if let Some(trials) = args.trials {
        config.run.trials = trials;
    }
    if let Some(value) = &args.harness {
        config.harness = HarnessKind::from_str(value)
            .ok_or_else(|| anyhow::anyhow!("Unknown harness: {value}"))?;
    }
    if let Some(script) = args.script {
        config.replay_script = Some(script);
    }
    if args.no_warmup {
        config.run.warmup = false;
    }
    config.validate()?;

    let format = ReportFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let scenarios = select_scenarios(load_scenarios(&config.targets_path)?, &args.scenarios)?;
    let classes = config.select_classes(&args.classes)?;
    let store = ArtifactStore::new(&config.output_dir);

    info!(
        "Benchmarking {} scenario(s) x {} class(es) with {} capture on the {} harness",
        scenarios.len(),
        classes.len(),
        config.run.strategy,
        config.harness
    );

    let (outcomes, failures) = run_keys(&scenarios, &classes, &config.run, &store, |scenario| {
        build_harness(&config, scenario)
    })
    .await;

    let table = store.aggregate()?;
    store.write_aggregate(&table)?;
    println!("{}", table.render(format)?);

    if failures > 0 {
        anyhow::bail!(
            "{} of {} scenario/class run(s) failed",
            failures,
            failures + outcomes.len()
        );
    }
    Ok(())
}

/// Run every scenario/class key, continuing past failed ones
///
/// A scenario whose harness cannot be built counts one failure per class.
async fn run_keys<F>(
    scenarios: &[Scenario],
    classes: &[TrialClass],
    settings: &RunSettings,
    store: &ArtifactStore,
    build: F,
) -> (Vec<ScenarioOutcome>, usize)
where
    F: Fn(&Scenario) -> Result<Box<dyn UiHarness>>,
{
    let mut outcomes: Vec<ScenarioOutcome> = Vec::new();
    let mut failures = 0usize;
    for scenario in scenarios {
        let harness = match build(scenario) {
            Ok(harness) => harness,
            Err(e) => {
                error!(scenario = %scenario.name, "Harness setup failed: {:#}", e);
                failures += classes.len();
                continue;
            }
        };
        let runner = TrialRunner::new(harness.as_ref(), settings, store);

        for class in classes {
            match runner.run_scenario(scenario, class).await {
                Ok(outcome) => {
                    println!("{}", outcome.format_summary());
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(scenario = %scenario.name, class = %class.id, "Run failed: {:#}", e);
                    failures += 1;
                }
            }
        }
    }
    (outcomes, failures)
}

/// Keep the named scenarios, in file order
fn select_scenarios(scenarios: Vec<Scenario>, names: &[String]) -> Result<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(scenarios);
    }
    for name in names {
        if !scenarios.iter().any(|s| &s.name == name) {
            anyhow::bail!("Unknown scenario: {name}");
        }
    }
    Ok(scenarios
        .into_iter()
        .filter(|s| names.contains(&s.name))
        .collect())
}

fn build_harness(config: &BenchConfig, scenario: &Scenario) -> Result<Box<dyn UiHarness>> {
    match config.harness {
        HarnessKind::Replay => {
            let mut script = match &config.replay_script {
                Some(path) => ReplayScript::load(path)?,
                None => ReplayScript::for_scenario(scenario),
            };
            if config.network.is_some() {
                script.network = config.network.clone();
            }
            Ok(Box::new(ReplayHarness::new(script)))
        }
        HarnessKind::Http => {
            if config.network.is_some() {
                warn!("The http harness cannot emulate network conditions; running unthrottled");
            }
            Ok(Box::new(HttpHarness::new(
                scenario,
                config.http_timeout_secs,
                None,
            )?))
        }
    }
}

fn aggregate(args: cli::AggregateArgs, config: &BenchConfig) -> Result<()> {
    let format = ReportFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let dir = args.output.unwrap_or_else(|| config.output_dir.clone());
    let store = ArtifactStore::new(dir);

    let table = store.aggregate()?;
    if table.is_empty() {
        warn!("No artifacts found in {}", store.base_dir().display());
    }
    store.write_aggregate(&table)?;
    println!("{}", table.render(format)?);
    Ok(())
}

fn summarize_file(args: cli::SummarizeArgs) -> Result<()> {
    let records = read_records(&args.file)?;
    let summary = summarize(&records);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} record(s): {}", records.len(), summary.format_summary());
    }
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<MetricRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records: {}", path.display()))
}

fn list(args: cli::ListArgs, config: &BenchConfig) -> Result<()> {
    let path = args.targets.unwrap_or_else(|| config.targets_path.clone());
    let scenarios = load_scenarios(&path)?;

    println!("\nScenarios ({}):\n", path.display());
    for scenario in &scenarios {
        if args.detailed {
            println!("  {:20} {}", scenario.name, scenario.base_url);
            println!("  {:20} fetch: {}", "", scenario.fetch_regex);
            println!(
                "  {:20} input: {}  send: {}  assistant: {}",
                "",
                scenario.selectors.input,
                scenario.selectors.send,
                scenario.selectors.assistant
            );
            if let Some(http) = &scenario.http {
                println!("  {:20} http: {} {} ({})", "", http.method, http.path, http.body_field);
            }
        } else {
            println!("  - {:20} {}", scenario.name, scenario.base_url);
        }
    }

    println!("\nTrial classes:\n");
    for class in &config.classes {
        println!("  {:4} {:16} \"{}\"", class.id, class.name, class.prompt);
    }
    println!();
    Ok(())
}

fn manage_config(action: ConfigAction, config: &BenchConfig, env: &EnvConfig) -> Result<()> {
    match action {
        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            BenchConfig::example().save(&path)?;
            println!("Wrote example configuration to {}", path.display());
        }
        ConfigAction::Show => {
            println!("{}", serde_yaml::to_string(config)?);
            if env.has_any() {
                env.print_summary();
            }
        }
    }
    Ok(())
}
