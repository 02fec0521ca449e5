use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    mcp::{ToolCallError, ToolDescriptor, ToolHandler, ToolOutput},
    pattern::{input_schema, PatternEngine, PatternError},
};

pub const TEST_PATTERN: &str = "test_pattern";

/// Exposes the pattern engine as the `test_pattern` tool.
pub struct PatternTools {
    engine: Arc<PatternEngine>,
}

impl PatternTools {
    pub fn new(engine: Arc<PatternEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ToolHandler for PatternTools {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: TEST_PATTERN.to_string(),
            description: "Test a collaboration pattern with multiple scenarios".to_string(),
            input_schema: input_schema(),
        }]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolCallError> {
        if name != TEST_PATTERN {
            return Err(ToolCallError::UnknownTool(name.to_string()));
        }

        match self.engine.run_raw(&arguments).await {
            Ok(report) => {
                info!(
                    scenarios = report.summary.total_scenarios,
                    failed = report.summary.failed_scenarios,
                    "test_pattern finished"
                );
                Ok(ToolOutput::text(report.to_json_pretty()?))
            }
            Err(error) => {
                match &error {
                    PatternError::Validation(validation) => {
                        warn!(violations = validation.violations.len(), "rejected test_pattern arguments")
                    }
                    PatternError::Resource(resource) => {
                        warn!(path = resource.path(), "could not resolve prompt resource")
                    }
                }
                Ok(ToolOutput::error(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        pattern::InMemoryResolver,
        providers::scripted::ScriptedProvider,
        sampling::ProviderBackend,
    };

    fn tools(replies: &[&str]) -> Arc<PatternTools> {
        let provider = Arc::new(ScriptedProvider::from_texts(replies.iter().copied()));
        let backend = Arc::new(ProviderBackend::new(provider, "scripted"));
        let engine = PatternEngine::new(backend, Arc::new(InMemoryResolver::new()));
        Arc::new(PatternTools::new(Arc::new(engine)))
    }

    #[tokio::test]
    async fn call_runs_on_a_spawned_task() {
        let tools = tools(&["First reply.", "Second reply."]);

        let output = tokio::spawn(async move {
            tools
                .call_tool(
                    TEST_PATTERN,
                    json!({ "base_context": "ctx", "test_scenarios": ["a", "b"] }),
                )
                .await
        })
        .await
        .unwrap()
        .unwrap();

        assert!(!output.is_error);
        let report: Value = serde_json::from_str(&output.content[0].text).unwrap();
        assert_eq!(report["results"][0]["response"], "First reply.");
        assert_eq!(report["results"][1]["response"], "Second reply.");
        assert_eq!(report["summary"]["total_scenarios"], 2);
    }

    #[tokio::test]
    async fn invalid_arguments_are_tool_errors() {
        let output = tools(&[])
            .call_tool(TEST_PATTERN, json!({ "base_context": "ctx", "test_scenarios": [] }))
            .await
            .unwrap();

        assert!(output.is_error);
        assert!(output.content[0].text.contains("/test_scenarios"));
    }

    #[tokio::test]
    async fn other_names_are_unknown_tools() {
        let error = tools(&[]).call_tool("summarize", json!({})).await.unwrap_err();
        assert!(matches!(error, ToolCallError::UnknownTool(name) if name == "summarize"));
    }
}
