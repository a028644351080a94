//! Provider trait: the capability set every LLM backend supplies.
//!
//! The dialog driver never sees a concrete backend. It encodes, calls and
//! decodes through this trait, so adding a provider family means writing one
//! implementation and registering it with the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, FatalError, ProviderError};
use crate::message::Message;
use crate::tool::ToolDefinition;

/// A provider-agnostic completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The model to use (e.g. "gpt-4o", "claude-3-haiku-20240307")
    pub model: String,

    /// System instructions, sent however the provider expects them
    pub system_prompt: Option<String>,

    /// The transcript so far
    pub messages: Vec<Message>,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    Length,
    ContentFilter,
    StopSequence,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolUse => "tool_use",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::StopSequence => "stop_sequence",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage information. `total_tokens` is always input + output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }

    /// Sum of two usages.
    pub fn combine(self, other: Usage) -> Usage {
        Usage::new(
            self.input_tokens.saturating_add(other.input_tokens),
            self.output_tokens.saturating_add(other.output_tokens),
        )
    }
}

/// Tool arguments as the provider delivered them.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArguments {
    /// Already structured (Messages-style `input`).
    Json(serde_json::Value),
    /// A JSON document still to be parsed (Chat-Completions `arguments`).
    Text(String),
}

/// A tool call before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: RawArguments,
}

/// The single choice a provider returned.
#[derive(Debug, Clone)]
pub struct Choice {
    pub stop_reason: StopReason,
    /// The assistant message, preserved intact.
    pub message: Message,
    /// Tool calls in emission order.
    pub tool_calls: Vec<RawToolCall>,
}

/// A decoded provider reply.
#[derive(Debug, Clone)]
pub struct Completion {
    /// `None` when the provider returned no choices or no content.
    pub choice: Option<Choice>,

    pub usage: Usage,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// The provider capability set.
///
/// Implementations: Messages-style (Anthropic) and Chat-Completions-style
/// (OpenAI) backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g. "anthropic", "openai").
    fn name(&self) -> &str;

    /// Canonical transcript → provider wire messages.
    fn encode_messages(&self, messages: &[Message]) -> Result<Vec<serde_json::Value>, FatalError>;

    /// Provider wire messages → canonical transcript.
    fn decode_messages(&self, encoded: &[serde_json::Value]) -> Result<Vec<Message>, FatalError>;

    /// Tool definitions → provider wire tools.
    fn encode_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Provider stop/finish reason → canonical stop reason.
    ///
    /// Unknown values are fatal.
    fn map_stop_reason(&self, raw: &str) -> Result<StopReason, FatalError>;

    /// Build the full request body.
    fn encode_request(&self, request: &CompletionRequest) -> Result<serde_json::Value, FatalError>;

    /// Send a request body and return the raw reply.
    async fn call(&self, body: serde_json::Value) -> Result<serde_json::Value, ProviderError>;

    /// Decode a raw reply.
    ///
    /// Malformed payloads are [`Error::Provider`]; unknown stop reasons are
    /// [`Error::Fatal`].
    fn decode_response(&self, raw: serde_json::Value) -> Result<Completion, Error>;

    /// Encode, call and decode in one step.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, Error> {
        let body = self.encode_request(request)?;
        let raw = self.call(body).await?;
        self.decode_response(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_sum() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);

        let combined = usage.combine(Usage::new(10, 5));
        assert_eq!(combined, Usage::new(130, 35));
        assert_eq!(combined.total_tokens, combined.input_tokens + combined.output_tokens);
    }

    #[test]
    fn usage_serializes_camel_case() {
        let value = serde_json::to_value(Usage::new(1, 2)).unwrap();
        assert_eq!(value["inputTokens"], 1);
        assert_eq!(value["outputTokens"], 2);
        assert_eq!(value["totalTokens"], 3);
    }

    #[test]
    fn stop_reason_round_trips_snake_case() {
        let json = serde_json::to_string(&StopReason::ContentFilter).unwrap();
        assert_eq!(json, "\"content_filter\"");
        let back: StopReason = serde_json::from_str("\"tool_use\"").unwrap();
        assert_eq!(back, StopReason::ToolUse);
        assert_eq!(StopReason::StopSequence.to_string(), "stop_sequence");
    }

    #[test]
    fn request_builder() {
        let req = CompletionRequest::new("gpt-4o", vec![Message::user("hi")])
            .with_system_prompt("extract")
            .with_max_tokens(512);
        assert_eq!(req.system_prompt.as_deref(), Some("extract"));
        assert_eq!(req.max_tokens, Some(512));
        assert!(req.tools.is_empty());
    }
}
