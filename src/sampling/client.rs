use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    mcp::{jsonrpc::METHOD_NOT_FOUND, Peer, PeerError},
    pattern::SamplingConfig,
    sampling::{
        estimate_tokens, with_deadline, ConversationContext, SampleResult, SamplingBackend,
        SamplingError, DEFAULT_SAMPLE_TIMEOUT,
    },
};

/// Asks the connected MCP client to sample on the server's behalf
/// (`sampling/createMessage`).
pub struct ClientSamplingBackend {
    peer: Peer,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CreateMessageResult {
    content: SamplingContent,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, rename = "stopReason")]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SamplingContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ClientSamplingBackend {
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            timeout: DEFAULT_SAMPLE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn create_message_params(context: &ConversationContext, config: &SamplingConfig) -> Value {
        let mut params = json!({
            "messages": [
                { "role": "user", "content": { "type": "text", "text": context.base_context() } },
                { "role": "user", "content": { "type": "text", "text": context.scenario } }
            ],
            "maxTokens": config.max_tokens,
            "temperature": config.temperature,
            "includeContext": "none"
        });
        if let Some(system) = context.system_text() {
            params["systemPrompt"] = Value::String(system);
        }
        params
    }
}

#[async_trait]
impl SamplingBackend for ClientSamplingBackend {
    async fn sample(
        &self,
        context: &ConversationContext,
        config: &SamplingConfig,
    ) -> Result<SampleResult, SamplingError> {
        let params = Self::create_message_params(context, config);
        let started = Instant::now();

        let raw = with_deadline(self.timeout, async {
            self.peer
                .request("sampling/createMessage", params)
                .await
                .map_err(|error| match error {
                    PeerError::Closed => SamplingError::unavailable("client connection closed"),
                    PeerError::Remote(remote) if remote.code == METHOD_NOT_FOUND => {
                        SamplingError::unavailable(format!("client does not support sampling: {}", remote.message))
                    }
                    PeerError::Remote(remote) => SamplingError::rejected(remote.message),
                })
        })
        .await?;
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result: CreateMessageResult = serde_json::from_value(raw)
            .map_err(|err| SamplingError::invalid_response(format!("malformed sampling result: {err}")))?;
        debug!(
            model = result.model.as_deref().unwrap_or("unknown"),
            stop_reason = result.stop_reason.as_deref().unwrap_or("unknown"),
            "client sampled message"
        );

        if result.content.kind != "text" {
            return Err(SamplingError::invalid_response(format!(
                "expected text content, got {}",
                result.content.kind
            )));
        }
        let text = result
            .content
            .text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| SamplingError::invalid_response("sampling result contained no text"))?;

        Ok(SampleResult {
            token_count: estimate_tokens(&text),
            text,
            response_time_ms,
            reasoning: None,
        })
    }

    fn name(&self) -> &'static str {
        "mcp-client"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sampling::{ContextPrefix, SamplingErrorKind};

    #[test]
    fn params_carry_system_prompt_and_scenario_last() {
        let prefix = Arc::new(
            ContextPrefix::new("We are pair programming.")
                .with_system_prompt("You are a careful collaborator."),
        );
        let context = ConversationContext::new(prefix, "Is this ready to ship?");
        let params = ClientSamplingBackend::create_message_params(&context, &SamplingConfig::default());

        assert_eq!(params["systemPrompt"], "You are a careful collaborator.");
        assert_eq!(params["maxTokens"], 500);
        assert_eq!(params["messages"][0]["content"]["text"], "We are pair programming.");
        assert_eq!(params["messages"][1]["content"]["text"], "Is this ready to ship?");
        assert_eq!(params["includeContext"], "none");
    }

    #[test]
    fn params_omit_empty_system_prompt() {
        let context = ConversationContext::new(Arc::new(ContextPrefix::new("ctx")), "go");
        let params = ClientSamplingBackend::create_message_params(&context, &SamplingConfig::default());
        assert!(params.get("systemPrompt").is_none());
    }

    #[tokio::test]
    async fn closed_connection_is_unavailable() {
        let backend = ClientSamplingBackend::new(Peer::disconnected());
        let context = ConversationContext::new(Arc::new(ContextPrefix::new("ctx")), "go");

        let error = backend.sample(&context, &SamplingConfig::default()).await.unwrap_err();
        assert_eq!(error.kind, SamplingErrorKind::Unavailable);
    }
}
