use std::{collections::VecDeque, sync::Mutex, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage},
    LLMError,
};

/// One canned reply. `None` text makes the call fail with a provider error.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub text: Option<String>,
    pub latency: Option<Duration>,
    pub completion_tokens: u32,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let completion_tokens = text.split_whitespace().count() as u32;
        Self {
            text: Some(text),
            latency: None,
            completion_tokens,
        }
    }

    pub fn failure() -> Self {
        Self {
            text: None,
            latency: None,
            completion_tokens: 0,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// Replays replies in call order, then fails once they run out.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_replies<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = ScriptedReply>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_replies(texts.into_iter().map(ScriptedReply::text))
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        self.replies.lock().ok().and_then(|mut queue| queue.pop_front())
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let reply = self
            .next_reply()
            .ok_or_else(|| LLMError::Provider("no more scripted responses".to_string()))?;

        if let Some(latency) = reply.latency {
            sleep(latency).await;
        }

        let text = reply
            .text
            .ok_or_else(|| LLMError::Provider("scripted failure".to_string()))?;

        let prompt_tokens = request
            .messages
            .iter()
            .filter_map(ChatMessage::text)
            .map(|content| content.split_whitespace().count() as u32)
            .sum::<u32>();

        Ok(CompletionResponse {
            message: ChatMessage::assistant(text),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens: reply.completion_tokens,
                total_tokens: prompt_tokens + reply.completion_tokens,
            }),
            reasoning: None,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let provider = ScriptedProvider::from_texts(["first", "second reply"]);
        let request = CompletionRequest::new("scripted", vec![ChatMessage::user("hello there")]);

        let first = provider.complete(request.clone()).await.unwrap();
        assert_eq!(first.message.text(), Some("first"));
        let usage = first.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 1);

        let second = provider.complete(request.clone()).await.unwrap();
        assert_eq!(second.message.text(), Some("second reply"));
        assert_eq!(provider.remaining(), 0);

        let error = provider.complete(request).await.unwrap_err();
        assert!(matches!(error, LLMError::Provider(_)));
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_as_provider_error() {
        let provider = ScriptedProvider::from_replies([ScriptedReply::failure()]);
        let request = CompletionRequest::new("scripted", vec![ChatMessage::user("hi")]);
        let error = provider.complete(request).await.unwrap_err();
        assert_eq!(error.to_string(), "provider error: scripted failure");
    }
}
