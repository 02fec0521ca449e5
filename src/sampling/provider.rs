use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    pattern::SamplingConfig,
    sampling::{
        estimate_tokens, with_deadline, ConversationContext, SampleResult, SamplingBackend,
        SamplingError, SamplingErrorKind, DEFAULT_SAMPLE_TIMEOUT,
    },
    types::CompletionRequest,
    LLMError, LLMProvider,
};

/// Samples through any chat-completion [`LLMProvider`].
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
    timeout: Duration,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: DEFAULT_SAMPLE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_for(&self, context: &ConversationContext, config: &SamplingConfig) -> CompletionRequest {
        CompletionRequest::new(self.model.clone(), context.to_messages())
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature as f32)
            .with_reasoning(config.include_reasoning)
    }
}

#[async_trait]
impl SamplingBackend for ProviderBackend {
    async fn sample(
        &self,
        context: &ConversationContext,
        config: &SamplingConfig,
    ) -> Result<SampleResult, SamplingError> {
        let request = self.request_for(context, config);
        debug!(
            provider = self.provider.name(),
            model = %self.model,
            messages = request.messages.len(),
            "dispatching completion"
        );

        let started = Instant::now();
        let response = with_deadline(self.timeout, async {
            self.provider.complete(request).await.map_err(sampling_error)
        })
        .await?;
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let text = response
            .message
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| SamplingError::invalid_response("completion contained no text"))?;

        let token_count = response
            .usage
            .map(|usage| usage.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&text));

        let reasoning = response
            .reasoning
            .map(|traces| {
                traces
                    .into_iter()
                    .map(|trace| trace.content)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|reasoning| config.include_reasoning && !reasoning.is_empty());

        Ok(SampleResult {
            text,
            token_count,
            response_time_ms,
            reasoning,
        })
    }

    fn name(&self) -> &'static str {
        self.provider.name()
    }
}

fn sampling_error(error: LLMError) -> SamplingError {
    match error {
        LLMError::Http(err) if err.is_timeout() => {
            SamplingError::new(SamplingErrorKind::Timeout, err.to_string())
        }
        LLMError::Http(err) => SamplingError::unavailable(err.to_string()),
        LLMError::MissingApiKey(_) => SamplingError::unavailable(error.to_string()),
        LLMError::Provider(message) => SamplingError::rejected(message),
        LLMError::Serialization(_) | LLMError::InvalidResponse(_) => {
            SamplingError::invalid_response(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        providers::scripted::{ScriptedProvider, ScriptedReply},
        sampling::ContextPrefix,
    };

    fn context(scenario: &str) -> ConversationContext {
        ConversationContext::new(
            Arc::new(ContextPrefix::new("We are pair programming.")),
            scenario,
        )
    }

    #[tokio::test]
    async fn maps_completion_into_sample() {
        let provider = Arc::new(ScriptedProvider::from_texts(["Yes, extract the helper first."]));
        let backend = ProviderBackend::new(provider, "scripted");

        let sample = backend
            .sample(&context("Should I refactor this?"), &SamplingConfig::default())
            .await
            .unwrap();

        assert_eq!(sample.text, "Yes, extract the helper first.");
        assert_eq!(sample.token_count, 5);
        assert!(sample.response_time_ms >= 0.0);
        assert!(sample.reasoning.is_none());
    }

    #[tokio::test]
    async fn provider_failure_becomes_rejected() {
        let provider = Arc::new(ScriptedProvider::from_replies([ScriptedReply::failure()]));
        let backend = ProviderBackend::new(provider, "scripted");

        let error = backend
            .sample(&context("Is this ready to ship?"), &SamplingConfig::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind, SamplingErrorKind::Rejected);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let provider = Arc::new(ScriptedProvider::from_replies([
            ScriptedReply::text("late").with_latency(Duration::from_millis(250)),
        ]));
        let backend = ProviderBackend::new(provider, "scripted").with_timeout(Duration::from_millis(10));

        let error = backend
            .sample(&context("Ship it?"), &SamplingConfig::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind, SamplingErrorKind::Timeout);
    }

    #[test]
    fn request_carries_sampling_config() {
        let backend = ProviderBackend::new(Arc::new(ScriptedProvider::new()), "gpt-test");
        let config = SamplingConfig {
            temperature: 1.5,
            max_tokens: 42,
            include_reasoning: true,
        };

        let request = backend.request_for(&context("Next?"), &config);
        assert_eq!(request.model, "gpt-test");
        assert_eq!(request.max_tokens, Some(42));
        assert_eq!(request.temperature, Some(1.5));
        assert!(request.include_reasoning);
        assert_eq!(request.messages.len(), 2);
    }
}
