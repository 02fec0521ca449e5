pub mod config;
pub mod error;
pub mod mcp;
pub mod pattern;
pub mod providers;
pub mod sampling;
pub mod types;

pub use error::LLMError;
pub use providers::LLMProvider;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ReasoningTrace, TokenUsage,
};
pub use pattern::{
    PatternEngine,
    PatternError,
    PatternReport,
    PatternTest,
    RunSummary,
    SamplingConfig,
    ScenarioResult,
};
pub use sampling::{
    ContextPrefix,
    ConversationContext,
    SampleResult,
    SamplingBackend,
    SamplingError,
    SamplingErrorKind,
};
pub use mcp::{Connection, PatternTools};
pub use schemars::JsonSchema;
