use std::{
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::{
    pattern::{
        request::{PatternTest, SamplingConfig},
        resources::{ResourceError, ResourceResolver},
    },
    sampling::{ContextPrefix, ConversationContext, SampleResult, SamplingBackend, SamplingError},
};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioOutcome {
    Success(SampleResult),
    Failure {
        error: SamplingError,
        response_time_ms: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    pub test_scenario: String,
    pub outcome: ScenarioOutcome,
}

impl ScenarioResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Success(_))
    }

    pub fn sample(&self) -> Option<&SampleResult> {
        match &self.outcome {
            ScenarioOutcome::Success(sample) => Some(sample),
            ScenarioOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&SamplingError> {
        match &self.outcome {
            ScenarioOutcome::Success(_) => None,
            ScenarioOutcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn token_count(&self) -> u32 {
        self.sample().map_or(0, |sample| sample.token_count)
    }

    pub fn response_time_ms(&self) -> f64 {
        match &self.outcome {
            ScenarioOutcome::Success(sample) => sample.response_time_ms,
            ScenarioOutcome::Failure { response_time_ms, .. } => *response_time_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_scenarios: usize,
    pub total_tokens: u64,
    pub avg_response_time_ms: f64,
    pub failed_scenarios: usize,
    #[serde(serialize_with = "epoch_seconds")]
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    /// Token and latency figures count successful scenarios only.
    pub fn from_results(results: &[ScenarioResult], completed_at: DateTime<Utc>) -> Self {
        let successes: Vec<&SampleResult> = results.iter().filter_map(ScenarioResult::sample).collect();

        let total_tokens = successes
            .iter()
            .map(|sample| u64::from(sample.token_count))
            .sum();
        let avg_response_time_ms = if successes.is_empty() {
            0.0
        } else {
            successes.iter().map(|sample| sample.response_time_ms).sum::<f64>()
                / successes.len() as f64
        };

        Self {
            total_scenarios: results.len(),
            total_tokens,
            avg_response_time_ms,
            failed_scenarios: results.len() - successes.len(),
            completed_at,
        }
    }
}

fn epoch_seconds<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    let seconds = value.timestamp() as f64 + f64::from(value.timestamp_subsec_micros()) / 1_000_000.0;
    serializer.serialize_f64(seconds)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternRun {
    pub results: Vec<ScenarioResult>,
    pub summary: RunSummary,
}

/// Runs one pattern test: resolves the shared prompt text, samples every
/// scenario through the backend, and summarizes.
///
/// Holds no state between runs. Up to `max_concurrency` samples are in flight
/// at once; results always come back in scenario order.
pub struct PatternEngine {
    backend: Arc<dyn SamplingBackend>,
    resolver: Arc<dyn ResourceResolver>,
    max_concurrency: usize,
}

impl PatternEngine {
    pub fn new(backend: Arc<dyn SamplingBackend>, resolver: Arc<dyn ResourceResolver>) -> Self {
        Self {
            backend,
            resolver,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Fails only when a referenced prompt or reminder cannot be resolved, and
    /// then before any sampling call. Sampling failures land in the results.
    pub async fn run(&self, test: &PatternTest) -> Result<PatternRun, ResourceError> {
        let prefix = Arc::new(self.resolve_prefix(test).await?);
        let config = &test.sampling_config;

        info!(
            scenarios = test.test_scenarios.len(),
            backend = self.backend.name(),
            max_concurrency = self.max_concurrency,
            "starting pattern test"
        );

        let mut slots: Vec<Option<ScenarioResult>> = test.test_scenarios.iter().map(|_| None).collect();
        let mut samples = stream::iter(test.test_scenarios.iter().cloned().enumerate())
            .map(|(index, scenario)| {
                let context = ConversationContext::new(Arc::clone(&prefix), scenario);
                async move { (index, self.sample_scenario(context, config).await) }
            })
            .buffer_unordered(self.max_concurrency);

        while let Some((index, result)) = samples.next().await {
            slots[index] = Some(result);
        }
        drop(samples);

        let results: Vec<ScenarioResult> = slots.into_iter().flatten().collect();
        let summary = RunSummary::from_results(&results, Utc::now());

        info!(
            total = summary.total_scenarios,
            failed = summary.failed_scenarios,
            tokens = summary.total_tokens,
            "pattern test completed"
        );

        Ok(PatternRun { results, summary })
    }

    async fn resolve_prefix(&self, test: &PatternTest) -> Result<ContextPrefix, ResourceError> {
        let mut prefix = ContextPrefix::new(test.base_context.clone());

        if let Some(path) = &test.system_prompt_path {
            prefix.system_prompt = Some(self.resolver.resolve(path).await?);
        }
        for path in &test.system_reminders_paths {
            prefix.reminders.push(self.resolver.resolve(path).await?);
        }

        Ok(prefix)
    }

    async fn sample_scenario(
        &self,
        context: ConversationContext,
        config: &SamplingConfig,
    ) -> ScenarioResult {
        let started = Instant::now();
        let outcome = match self.backend.sample(&context, config).await {
            Ok(sample) => {
                debug!(
                    scenario = %context.scenario,
                    tokens = sample.token_count,
                    response_time_ms = sample.response_time_ms,
                    "scenario sampled"
                );
                ScenarioOutcome::Success(sample)
            }
            Err(error) => {
                warn!(scenario = %context.scenario, kind = %error.kind, "scenario failed: {}", error.message);
                ScenarioOutcome::Failure {
                    error,
                    response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                }
            }
        };

        ScenarioResult {
            test_scenario: context.scenario,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        pattern::resources::InMemoryResolver,
        sampling::SamplingErrorKind,
    };

    /// Answers with the scenario text; earlier scenarios sleep longer so they
    /// finish last.
    struct ReverseLatencyBackend {
        total: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen_systems: Mutex<HashSet<Option<String>>>,
    }

    impl ReverseLatencyBackend {
        fn new(total: usize) -> Self {
            Self {
                total,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                seen_systems: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl SamplingBackend for ReverseLatencyBackend {
        async fn sample(
            &self,
            context: &ConversationContext,
            _config: &SamplingConfig,
        ) -> Result<SampleResult, SamplingError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen_systems.lock().unwrap().insert(context.system_text());

            let index: usize = context.scenario.trim_start_matches('s').parse().unwrap();
            sleep(Duration::from_millis(((self.total - index) * 5) as u64)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(SampleResult {
                text: format!("reply to {}", context.scenario),
                token_count: 10,
                response_time_ms: 2.0 * (index + 1) as f64,
                reasoning: None,
            })
        }

        fn name(&self) -> &'static str {
            "reverse"
        }
    }

    fn sample(tokens: u32, ms: f64) -> ScenarioResult {
        ScenarioResult {
            test_scenario: "s".to_string(),
            outcome: ScenarioOutcome::Success(SampleResult {
                text: "ok".to_string(),
                token_count: tokens,
                response_time_ms: ms,
                reasoning: None,
            }),
        }
    }

    fn failure() -> ScenarioResult {
        ScenarioResult {
            test_scenario: "f".to_string(),
            outcome: ScenarioOutcome::Failure {
                error: SamplingError::unavailable("down"),
                response_time_ms: 999.0,
            },
        }
    }

    #[test]
    fn summary_counts_successes_only() {
        let results = vec![sample(10, 100.0), failure(), sample(30, 300.0)];
        let summary = RunSummary::from_results(&results, Utc::now());

        assert_eq!(summary.total_scenarios, 3);
        assert_eq!(summary.failed_scenarios, 1);
        assert_eq!(summary.total_tokens, 40);
        assert_eq!(summary.avg_response_time_ms, 200.0);
    }

    #[test]
    fn summary_of_all_failures_is_zeroed() {
        let results = vec![failure(), failure()];
        let summary = RunSummary::from_results(&results, Utc::now());

        assert_eq!(summary.total_scenarios, 2);
        assert_eq!(summary.failed_scenarios, 2);
        assert_eq!(summary.total_tokens, 0);
        assert_eq!(summary.avg_response_time_ms, 0.0);
    }

    #[test]
    fn completed_at_serializes_as_epoch_seconds() {
        let at = Utc.timestamp_opt(1_703_980_800, 500_000_000).unwrap();
        let summary = RunSummary::from_results(&[], at);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["completed_at"], 1_703_980_800.5);
    }

    #[tokio::test]
    async fn keeps_input_order_under_concurrency() {
        let scenarios: Vec<String> = (0..8).map(|i| format!("s{i}")).collect();
        let backend = Arc::new(ReverseLatencyBackend::new(scenarios.len()));
        let engine = PatternEngine::new(backend.clone(), Arc::new(InMemoryResolver::new()))
            .with_max_concurrency(3);

        let run = engine
            .run(&PatternTest::new("ctx", scenarios.clone()))
            .await
            .unwrap();

        let echoed: Vec<&str> = run.results.iter().map(|r| r.test_scenario.as_str()).collect();
        assert_eq!(echoed, scenarios.iter().map(String::as_str).collect::<Vec<_>>());
        for result in &run.results {
            assert_eq!(
                result.sample().unwrap().text,
                format!("reply to {}", result.test_scenario)
            );
        }
        assert!(backend.peak.load(Ordering::SeqCst) <= 3);
        assert!(backend.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn every_scenario_sees_the_same_prefix() {
        let resolver = InMemoryResolver::new()
            .with_entry("prompt.md", "You are a pair programmer.")
            .with_entry("CLAUDE.md", "Ask before large refactors.");
        let backend = Arc::new(ReverseLatencyBackend::new(3));
        let engine = PatternEngine::new(backend.clone(), Arc::new(resolver));

        let test = PatternTest::new("ctx", ["s0", "s1", "s2"])
            .with_system_prompt_path("prompt.md")
            .with_reminder_path("CLAUDE.md");
        engine.run(&test).await.unwrap();

        let seen = backend.seen_systems.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen.contains(&Some(
            "You are a pair programmer.\n\nAsk before large refactors.".to_string()
        )));
    }

    #[tokio::test]
    async fn missing_reminder_aborts_before_sampling() {
        let backend = Arc::new(ReverseLatencyBackend::new(1));
        let engine = PatternEngine::new(backend.clone(), Arc::new(InMemoryResolver::new()));

        let error = engine
            .run(&PatternTest::new("ctx", ["s0"]).with_reminder_path("gone.md"))
            .await
            .unwrap_err();

        assert_eq!(error.path(), "gone.md");
        assert!(backend.seen_systems.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrency_floor_is_one() {
        let engine = PatternEngine::new(
            Arc::new(ReverseLatencyBackend::new(1)),
            Arc::new(InMemoryResolver::new()),
        )
        .with_max_concurrency(0);
        assert_eq!(engine.max_concurrency(), 1);
    }

    #[test]
    fn failure_accessors() {
        let result = failure();
        assert!(!result.is_success());
        assert_eq!(result.token_count(), 0);
        assert_eq!(result.response_time_ms(), 999.0);
        assert_eq!(result.error().unwrap().kind, SamplingErrorKind::Unavailable);
    }
}
