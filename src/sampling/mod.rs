//! The narrow interface the pattern engine samples through.
//!
//! A [`SamplingBackend`] turns one assembled [`ConversationContext`] plus a
//! [`SamplingConfig`] into a [`SampleResult`]. Backends own their transport,
//! deadlines and any rate limiting; the engine only sees the outcome.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time;

use crate::{pattern::SamplingConfig, types::ChatMessage};

pub mod client;
pub mod provider;

pub use client::ClientSamplingBackend;
pub use provider::ProviderBackend;

pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait SamplingBackend: Send + Sync {
    async fn sample(
        &self,
        context: &ConversationContext,
        config: &SamplingConfig,
    ) -> Result<SampleResult, SamplingError>;

    fn name(&self) -> &'static str;
}

/// Resolved text shared by every scenario of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextPrefix {
    pub system_prompt: Option<String>,
    pub reminders: Vec<String>,
    pub base_context: String,
}

impl ContextPrefix {
    pub fn new(base_context: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            reminders: Vec::new(),
            base_context: base_context.into(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_reminder(mut self, reminder: impl Into<String>) -> Self {
        self.reminders.push(reminder.into());
        self
    }

    /// System prompt followed by the reminders in listed order, blank-line separated.
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .system_prompt
            .iter()
            .chain(self.reminders.iter())
            .map(|part| part.trim_end())
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Everything the model sees for one scenario; only `scenario` differs between
/// the contexts of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    pub prefix: Arc<ContextPrefix>,
    pub scenario: String,
}

impl ConversationContext {
    pub fn new(prefix: Arc<ContextPrefix>, scenario: impl Into<String>) -> Self {
        Self {
            prefix,
            scenario: scenario.into(),
        }
    }

    pub fn system_text(&self) -> Option<String> {
        self.prefix.system_text()
    }

    pub fn base_context(&self) -> &str {
        &self.prefix.base_context
    }

    /// Chat transcript: optional system message, the base context, then the
    /// scenario as the final user turn.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(3);
        if let Some(system) = self.system_text() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(self.prefix.base_context.clone()));
        messages.push(ChatMessage::user(self.scenario.clone()));
        messages
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    pub text: String,
    pub token_count: u32,
    pub response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingErrorKind {
    Unavailable,
    Timeout,
    Rejected,
    InvalidResponse,
}

impl fmt::Display for SamplingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unavailable => "backend unavailable",
            Self::Timeout => "backend timeout",
            Self::Rejected => "backend rejected input",
            Self::InvalidResponse => "invalid backend response",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct SamplingError {
    pub kind: SamplingErrorKind,
    pub message: String,
}

impl SamplingError {
    pub fn new(kind: SamplingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SamplingErrorKind::Unavailable, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            SamplingErrorKind::Timeout,
            format!("no response within {} ms", after.as_millis()),
        )
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SamplingErrorKind::Rejected, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(SamplingErrorKind::InvalidResponse, message)
    }
}

/// Rough token count for backends that report no usage: four characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

pub(crate) async fn with_deadline<F, T>(deadline: Duration, future: F) -> Result<T, SamplingError>
where
    F: Future<Output = Result<T, SamplingError>>,
{
    match time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(SamplingError::timeout(deadline)),
    }
}
