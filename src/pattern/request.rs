use std::fmt;

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use schemars::{gen::SchemaSettings, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 500;

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    #[serde(default = "default_temperature")]
    #[schemars(range(min = 0.0, max = 2.0))]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    #[schemars(range(min = 1))]
    pub max_tokens: u32,
    #[serde(default)]
    pub include_reasoning: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            include_reasoning: false,
        }
    }
}

/// One validated `test_pattern` request. Built once per call and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PatternTest {
    /// Base conversation context to establish the scenario
    #[schemars(length(min = 1))]
    pub base_context: String,
    /// Path to file containing the system prompt
    #[serde(default)]
    #[schemars(with = "String")]
    pub system_prompt_path: Option<String>,
    /// Paths to files containing system reminders (e.g., CLAUDE.md)
    #[serde(default)]
    pub system_reminders_paths: Vec<String>,
    /// Array of test statements/transitions to sample responses for
    #[schemars(length(min = 1))]
    pub test_scenarios: Vec<String>,
    #[serde(default)]
    pub sampling_config: SamplingConfig,
}

impl PatternTest {
    pub fn new<I, S>(base_context: impl Into<String>, scenarios: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_context: base_context.into(),
            system_prompt_path: None,
            system_reminders_paths: Vec::new(),
            test_scenarios: scenarios.into_iter().map(Into::into).collect(),
            sampling_config: SamplingConfig::default(),
        }
    }

    pub fn with_system_prompt_path(mut self, path: impl Into<String>) -> Self {
        self.system_prompt_path = Some(path.into());
        self
    }

    pub fn with_reminder_path(mut self, path: impl Into<String>) -> Self {
        self.system_reminders_paths.push(path.into());
        self
    }

    pub fn with_sampling_config(mut self, config: SamplingConfig) -> Self {
        self.sampling_config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer into the raw arguments; empty for the document root.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid test_pattern arguments: {}", render_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation::new(path, message)],
        }
    }

    pub fn has_violation_at(&self, path: &str) -> bool {
        self.violations.iter().any(|violation| violation.path == path)
    }
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

static INPUT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let generator = SchemaSettings::draft07()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator();
    let schema = generator.into_root_schema_for::<PatternTest>();
    serde_json::to_value(schema).expect("schema serialization should not fail")
});

static VALIDATOR: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&INPUT_SCHEMA)
        .expect("generated input schema should compile")
});

/// The closed JSON schema advertised for `test_pattern` and enforced by [`validate`].
pub fn input_schema() -> Value {
    INPUT_SCHEMA.clone()
}

/// Validates raw tool arguments, reporting every violated constraint at once.
pub fn validate(raw: &Value) -> Result<PatternTest, ValidationError> {
    let mut violations: Vec<Violation> = match VALIDATOR.validate(raw) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|error| Violation::new(error.instance_path.to_string(), error.to_string()))
            .collect(),
    };

    // Blank text passes the schema's length checks but carries no scenario.
    if let Some(base) = raw.get("base_context").and_then(Value::as_str) {
        if !base.is_empty() && base.trim().is_empty() {
            violations.push(Violation::new("/base_context", "must not be blank"));
        }
    }
    if let Some(scenarios) = raw.get("test_scenarios").and_then(Value::as_array) {
        for (index, scenario) in scenarios.iter().enumerate() {
            if scenario.as_str().is_some_and(|text| text.trim().is_empty()) {
                violations.push(Violation::new(
                    format!("/test_scenarios/{index}"),
                    "scenario must not be empty",
                ));
            }
        }
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    serde_json::from_value(raw.clone()).map_err(|err| ValidationError::single("", err.to_string()))
}
