//! Pattern tests: one base context, many candidate follow-ups, each sampled
//! independently and summarized.

use thiserror::Error;

pub mod engine;
pub mod report;
pub mod request;
pub mod resources;

pub use engine::{
    PatternEngine, PatternRun, RunSummary, ScenarioOutcome, ScenarioResult,
    DEFAULT_MAX_CONCURRENCY,
};
pub use report::{format, PatternReport, ResultEntry, ResultMetadata};
pub use request::{input_schema, validate, PatternTest, SamplingConfig, ValidationError, Violation};
pub use resources::{FsResolver, InMemoryResolver, ResourceError, ResourceResolver};

/// Why a whole pattern test produced no report. Per-scenario sampling
/// failures are not errors at this level.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl PatternEngine {
    /// Validates raw arguments, runs them and formats the report.
    pub async fn run_raw(&self, raw: &serde_json::Value) -> Result<PatternReport, PatternError> {
        let test = validate(raw)?;
        let run = self.run(&test).await?;
        Ok(format(&test, &run))
    }
}
