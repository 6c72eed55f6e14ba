//! Logging setup
//!
//! Crate events at the selected verbosity; the HTTP stack is capped at
//! `warn` so trial timings are not buried under connection chatter.

use tracing_subscriber::EnvFilter;

/// Dependencies that log every connection at debug
const NOISY_TARGETS: &[&str] = &["reqwest", "hyper", "hyper_util", "h2", "rustls"];

/// How much the benchmark reports while it runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    /// Phase boundaries and per-trial results
    #[default]
    Normal,
    /// Every latch, skipped response and sample
    Verbose,
}

impl Verbosity {
    /// `--quiet` wins over `--verbose`
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (_, true) => Verbosity::Quiet,
            (true, false) => Verbosity::Verbose,
            (false, false) => Verbosity::Normal,
        }
    }

    fn level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Filter for `verbosity`, e.g. `ui_latency_bench=debug,reqwest=warn,...`
pub fn filter_directive(verbosity: Verbosity) -> String {
    let mut directives = vec![format!("ui_latency_bench={}", verbosity.level())];
    directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence when set.
pub fn init_logger(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= Verbosity::Verbose)
        .compact()
        .init();
}
