use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::LLMError,
    providers::LLMProvider,
    types::{
        ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ReasoningTrace,
        TokenUsage,
    },
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub request_timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            project: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Chat-completions client for OpenAI and any API that speaks the same dialect.
#[derive(Debug, Clone)]
pub struct OpenAI {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAI {
    pub fn new(api_key: impl Into<String>) -> Result<Self, LLMError> {
        Self::from_config(OpenAIConfig::new(api_key))
    }

    pub fn from_env() -> Result<Self, LLMError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| LLMError::MissingApiKey("OPENAI_API_KEY"))?;
        let mut config = OpenAIConfig::new(api_key);

        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(org) = env::var("OPENAI_ORGANIZATION") {
            config.organization = Some(org);
        }
        if let Ok(project) = env::var("OPENAI_PROJECT") {
            config.project = Some(project);
        }
        if let Ok(timeout_ms) = env::var("OPENAI_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout_ms.parse::<u64>() {
                config.request_timeout = Duration::from_millis(ms);
            }
        }

        Self::from_config(config)
    }

    pub fn from_config(config: OpenAIConfig) -> Result<Self, LLMError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder.bearer_auth(&self.config.api_key);

        if let Some(ref org) = self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        if let Some(ref project) = self.config.project {
            builder = builder.header("OpenAI-Project", project);
        }

        builder
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    // OpenRouter and compatible gateways only return reasoning when asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    include_reasoning: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl ResponseMessage {
    /// Gateways name the trace `reasoning` or `reasoning_content`; some send both.
    fn reasoning_text(&mut self) -> Option<String> {
        let parts: Vec<String> = [self.reasoning.take(), self.reasoning_content.take()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();
        match parts.as_slice() {
            [] => None,
            [first, second] if first == second => Some(first.clone()),
            _ => Some(parts.join("\n")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[async_trait]
impl LLMProvider for OpenAI {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let CompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
            include_reasoning,
        } = request;

        let body = OpenAIRequestBody {
            model,
            messages,
            max_tokens,
            temperature,
            include_reasoning: include_reasoning.then_some(true),
        };

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("chat/completions")))
            .json(&body);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<OpenAIErrorEnvelope>(&text) {
                return Err(LLMError::Provider(error.error.message));
            }

            return Err(LLMError::Provider(format!("unexpected status {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let mut choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LLMError::InvalidResponse("response did not contain any choices"))?;

        let reasoning = match choice.message.reasoning_text() {
            Some(content) if include_reasoning => Some(vec![ReasoningTrace {
                content,
                finish_reason: choice.finish_reason.clone(),
            }]),
            _ => None,
        };

        Ok(CompletionResponse {
            message: ChatMessage {
                role: MessageRole::Assistant,
                content: choice.message.content,
                name: None,
            },
            usage: parsed.usage,
            reasoning,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
