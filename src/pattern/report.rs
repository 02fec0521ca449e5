use serde::Serialize;

use crate::{
    pattern::{
        engine::{PatternRun, RunSummary, ScenarioOutcome, ScenarioResult},
        request::{PatternTest, SamplingConfig},
    },
    sampling::SamplingErrorKind,
};

/// The payload `test_pattern` hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub pattern_test: PatternTest,
    pub results: Vec<ResultEntry>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultEntry {
    pub test_scenario: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultMetadata {
    pub token_count: u32,
    pub response_time_ms: f64,
    pub sampling_config: SamplingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SamplingErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl PatternReport {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub fn format(test: &PatternTest, run: &PatternRun) -> PatternReport {
    PatternReport {
        pattern_test: test.clone(),
        results: run
            .results
            .iter()
            .map(|result| entry(result, &test.sampling_config))
            .collect(),
        summary: run.summary.clone(),
    }
}

fn entry(result: &ScenarioResult, config: &SamplingConfig) -> ResultEntry {
    let metadata = ResultMetadata {
        token_count: result.token_count(),
        response_time_ms: result.response_time_ms(),
        sampling_config: config.clone(),
        error_kind: result.error().map(|error| error.kind),
        reasoning: result
            .sample()
            .and_then(|sample| sample.reasoning.clone())
            .filter(|_| config.include_reasoning),
    };

    let (response, error) = match &result.outcome {
        ScenarioOutcome::Success(sample) => (Some(sample.text.clone()), None),
        ScenarioOutcome::Failure { error, .. } => (None, Some(error.message.clone())),
    };

    ResultEntry {
        test_scenario: result.test_scenario.clone(),
        response,
        error,
        metadata,
    }
}
