//! Trial execution engine
//!
//! Runs a discarded warmup trial plus N measured trials of one scenario and
//! trial class, with exactly one capture strategy, then summarizes and
//! persists the result.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::summary::{summarize_set, SummaryStatistic};
use crate::capture::{
    sample_name, InPageInterceptor, ObservationOutcome, ObserverConfig, OutOfPageObserver,
    TrialContext, ERROR,
};
use crate::harness::{HarnessError, UiHarness};
use crate::models::{
    to_record_value, MetricField, MetricRecord, Scenario, TrialClass, TrialSet, SENTINEL,
};
use crate::results::ArtifactStore;
use crate::utils::{Clock, Timer};

/// How a trial's exchange is timed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureStrategy {
    /// Instrument the page's own fetch
    InPage,
    /// Correlate the page's network lifecycle events
    #[default]
    OutOfPage,
}

impl CaptureStrategy {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in-page" | "inpage" | "in_page" => Some(Self::InPage),
            "out-of-page" | "outofpage" | "out_of_page" | "network" => Some(Self::OutOfPage),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStrategy::InPage => write!(f, "in-page"),
            CaptureStrategy::OutOfPage => write!(f, "out-of-page"),
        }
    }
}

/// Fixed waits of the trial sequence, in milliseconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// After the first navigation
    pub page_settle_ms: u64,
    /// After each reload
    pub reload_settle_ms: u64,
    pub between_trials_ms: u64,
    pub after_warmup_ms: u64,
    /// Bound on waiting for the send button
    pub send_wait_ms: u64,
    /// Pause between filling the input and clicking send
    pub pre_click_ms: u64,
    /// Bound on waiting for the assistant element (out-of-page render)
    pub render_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            page_settle_ms: 2_000,
            reload_settle_ms: 1_000,
            between_trials_ms: 1_000,
            after_warmup_ms: 2_000,
            send_wait_ms: 5_000,
            pre_click_ms: 100,
            render_timeout_ms: 5_000,
        }
    }
}

/// Everything a run needs besides the harness and the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Measured trials per scenario and class
    pub trials: usize,
    /// Run one discarded warmup trial first
    pub warmup: bool,
    pub strategy: CaptureStrategy,
    /// Sample label used by in-page capture
    pub label: String,
    pub observer: ObserverConfig,
    pub timing: TimingConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            trials: 3,
            warmup: true,
            strategy: CaptureStrategy::default(),
            label: "chat".to_string(),
            observer: ObserverConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl RunSettings {
    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn trial_timeout(&self) -> Duration {
        Self::ms(self.observer.trial_timeout_ms)
    }
}

/// Result of one scenario and trial class
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub class: String,
    pub strategy: CaptureStrategy,
    pub summary: SummaryStatistic,
    pub trials: usize,
    /// Trials with at least one observed field
    pub observed_trials: usize,
    /// Expectation violations, informational only
    pub violations: Vec<String>,
    pub artifact: PathBuf,
}

impl ScenarioOutcome {
    /// Format as summary string
    pub fn format_summary(&self) -> String {
        let status = if self.violations.is_empty() {
            "OK"
        } else {
            "WARN"
        };
        format!(
            "[{}] {}/{} ({}, {}/{} observed): {}",
            status,
            self.scenario,
            self.class,
            self.strategy,
            self.observed_trials,
            self.trials,
            self.summary.format_summary()
        )
    }
}

/// Trial orchestrator over one harness
pub struct TrialRunner<'a, H: UiHarness + ?Sized> {
    harness: &'a H,
    settings: &'a RunSettings,
    store: &'a ArtifactStore,
}

impl<'a, H: UiHarness + ?Sized> TrialRunner<'a, H> {
    pub fn new(harness: &'a H, settings: &'a RunSettings, store: &'a ArtifactStore) -> Self {
        Self {
            harness,
            settings,
            store,
        }
    }

    /// Warmup plus measured trials, then summarize and persist
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        class: &TrialClass,
    ) -> Result<ScenarioOutcome> {
        scenario.validate()?;
        class.validate()?;
        let timing = &self.settings.timing;
        let timer = Timer::start(format!("{}-{}", scenario.name, class.id));

        info!(
            scenario = %scenario.name,
            class = %class.id,
            strategy = %self.settings.strategy,
            trials = self.settings.trials,
            "Starting scenario"
        );

        self.harness
            .navigate(&scenario.base_url)
            .await
            .with_context(|| format!("Failed to open {}", scenario.base_url))?;
        sleep(RunSettings::ms(timing.page_settle_ms)).await;

        match self.harness.network_conditions() {
            Some(conditions) => info!(conditions = %conditions.describe(), "Network conditions active"),
            None => warn!("No network conditions reported by the harness; timings are unthrottled"),
        }

        if self.settings.warmup {
            self.prepare(scenario).await?;
            let record = self.run_trial(scenario, class).await?;
            debug!(record = %record.format_summary(), "Warmup trial discarded");
            sleep(RunSettings::ms(timing.after_warmup_ms)).await;
        }

        let mut set = TrialSet::new(&scenario.name, &class.id);
        for trial in 1..=self.settings.trials {
            self.harness
                .reload()
                .await
                .with_context(|| format!("Failed to reload {}", scenario.base_url))?;
            sleep(RunSettings::ms(timing.reload_settle_ms)).await;
            self.prepare(scenario).await?;

            let record = self.run_trial(scenario, class).await?;
            info!(
                trial,
                total = self.settings.trials,
                record = %record.format_summary(),
                "Trial complete"
            );
            set.push(record);
            sleep(RunSettings::ms(timing.between_trials_ms)).await;
        }

        let summary = summarize_set(&set);
        let observed_trials = set.records.iter().filter(|r| !r.is_unobserved()).count();
        let violations = class.expectations.check(&summary);
        for violation in &violations {
            warn!(
                scenario = %scenario.name,
                class = %class.id,
                violation = %violation,
                "Expectation not met"
            );
        }

        let artifact = self.store.save(&scenario.name, &class.id, &summary)?;
        info!(
            scenario = %scenario.name,
            class = %class.id,
            summary = %summary.format_summary(),
            artifact = %artifact.display(),
            "Scenario complete"
        );
        timer.stop();

        Ok(ScenarioOutcome {
            scenario: scenario.name.clone(),
            class: class.id.clone(),
            strategy: self.settings.strategy,
            summary,
            trials: set.len(),
            observed_trials,
            violations,
            artifact,
        })
    }

    /// Click the scenario's prepare selectors that are present
    async fn prepare(&self, scenario: &Scenario) -> Result<()> {
        for selector in &scenario.prepare {
            if self.harness.element_exists(selector) {
                debug!(selector = %selector, "Prepare click");
                self.harness.click(selector).await?;
            } else {
                debug!(selector = %selector, "Prepare element not present");
            }
        }
        Ok(())
    }

    /// One trial with the configured strategy
    pub async fn run_trial(&self, scenario: &Scenario, class: &TrialClass) -> Result<MetricRecord> {
        match self.settings.strategy {
            CaptureStrategy::InPage => self.in_page_trial(scenario, class).await,
            CaptureStrategy::OutOfPage => self.out_of_page_trial(scenario, class).await,
        }
    }

    /// Fill the prompt and click send
    async fn perform_action(&self, scenario: &Scenario, prompt: &str) -> Result<(), HarnessError> {
        let selectors = &scenario.selectors;
        let send_wait = RunSettings::ms(self.settings.timing.send_wait_ms);

        self.harness.fill(&selectors.input, prompt).await?;
        if !self.harness.wait_for_element(&selectors.send, send_wait).await {
            return Err(HarnessError::Timeout(send_wait, selectors.send.clone()));
        }
        sleep(RunSettings::ms(self.settings.timing.pre_click_ms)).await;
        self.harness.click(&selectors.send).await
    }

    async fn in_page_trial(&self, scenario: &Scenario, class: &TrialClass) -> Result<MetricRecord> {
        let label = self.settings.label.as_str();
        let context = TrialContext::new();
        let original = self.harness.page_fetch();
        let interceptor = InPageInterceptor::install(
            Arc::clone(&original),
            &scenario.fetch_regex,
            label,
            context.clone(),
            self.harness.frame_clock(),
        )
        .with_context(|| format!("Invalid fetchRegex for {}", scenario.name))?;

        self.harness.set_page_fetch(Arc::new(interceptor));
        let outcome = self.await_in_page(scenario, class, &context).await;
        self.harness.set_page_fetch(original);
        outcome?;

        Ok(context.finalize(label))
    }

    async fn await_in_page(
        &self,
        scenario: &Scenario,
        class: &TrialClass,
        context: &TrialContext,
    ) -> Result<()> {
        self.perform_action(scenario, &class.prompt).await?;

        let label = self.settings.label.as_str();
        let terminal = [
            sample_name(label, MetricField::RenderMs.key()),
            sample_name(label, ERROR),
        ];
        match timeout(self.settings.trial_timeout(), context.wait_for_any(&terminal)).await {
            Ok(sample) => debug!(sample = %sample, "In-page trial finished"),
            Err(_) => warn!(
                timeout_ms = self.settings.observer.trial_timeout_ms,
                samples = context.len(),
                "In-page trial timed out"
            ),
        }
        Ok(())
    }

    async fn out_of_page_trial(
        &self,
        scenario: &Scenario,
        class: &TrialClass,
    ) -> Result<MetricRecord> {
        let observer = OutOfPageObserver::new(&scenario.fetch_regex, &self.settings.observer)
            .with_context(|| format!("Invalid fetchRegex for {}", scenario.name))?;
        let clock = self.harness.clock();

        let session = observer.attach(self.harness);
        let action_started = clock.now_ms();
        self.perform_action(scenario, &class.prompt).await?;
        let observation = session.collect().await;

        let mut record = observation.record;
        match observation.outcome {
            ObservationOutcome::TimedOut | ObservationOutcome::FeedClosed => {}
            _ => {
                let completed = observation.completed_at_ms.unwrap_or(action_started);
                record.render_ms = self.observe_render(scenario, completed, clock.as_ref()).await;
            }
        }
        Ok(record)
    }

    /// Next paint after the assistant element appears, relative to `completed`
    async fn observe_render(&self, scenario: &Scenario, completed: f64, clock: &dyn Clock) -> i64 {
        let assistant = &scenario.selectors.assistant;
        let limit = RunSettings::ms(self.settings.timing.render_timeout_ms);
        if !self.harness.wait_for_element(assistant, limit).await {
            warn!(selector = %assistant, "Assistant element never appeared");
            return SENTINEL;
        }
        self.harness.frame_clock().next_frame().await;
        to_record_value((clock.now_ms() - completed).max(0.0))
    }
}
