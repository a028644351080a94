//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Content blocks map 1:1 onto canonical content parts

use std::time::Duration;

use async_trait::async_trait;
use hash_ai_core::error::{Error, FatalError, ProviderError};
use hash_ai_core::message::{ContentPart, Message, Role};
use hash_ai_core::model::ModelRegistry;
use hash_ai_core::provider::*;
use hash_ai_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Supplies the default `max_tokens` per model.
    models: ModelRegistry,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: http::client(DEFAULT_TIMEOUT)?,
            models: ModelRegistry::builtin(),
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = http::client(timeout)?;
        Ok(self)
    }

    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    fn to_api_message(message: &Message) -> Result<AnthropicMessage, FatalError> {
        message.validate()?;
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => {
                return Err(FatalError::InvalidMessageShape(
                    "system messages belong in the top-level system field".into(),
                ));
            }
        };

        let blocks = message
            .content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
                ContentPart::ToolUse { id, name, input } => ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                },
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                },
            })
            .collect();

        Ok(AnthropicMessage {
            role: role.into(),
            content: AnthropicContent::Blocks(blocks),
        })
    }

    fn from_api_message(message: AnthropicMessage) -> Result<Message, FatalError> {
        let role = match message.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(FatalError::InvalidMessageShape(format!(
                    "unexpected Anthropic role {other:?}"
                )));
            }
        };

        let content = match message.content {
            AnthropicContent::Text(text) => vec![ContentPart::Text { text }],
            AnthropicContent::Blocks(blocks) => blocks
                .into_iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => ContentPart::Text { text },
                    ContentBlock::ToolUse { id, name, input } => {
                        ContentPart::ToolUse { id, name, input }
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    },
                })
                .collect(),
        };

        let message = Message { role, content };
        message.validate()?;
        Ok(message)
    }

    /// Convert an Anthropic API response to a canonical completion.
    fn response_to_completion(&self, resp: AnthropicResponse) -> Result<Completion, Error> {
        let raw_reason = resp.stop_reason.ok_or_else(|| {
            ProviderError::InvalidResponse("Anthropic response carries no stop_reason".into())
        })?;
        let stop_reason = self.map_stop_reason(&raw_reason)?;
        let usage = Usage::new(resp.usage.input_tokens, resp.usage.output_tokens);

        if resp.content.is_empty() {
            return Ok(Completion {
                choice: None,
                usage,
                model: resp.model,
            });
        }

        let mut parts = Vec::with_capacity(resp.content.len());
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => parts.push(ContentPart::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(RawToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: RawArguments::Json(input.clone()),
                    });
                    parts.push(ContentPart::ToolUse { id, name, input });
                }
            }
        }

        Ok(Completion {
            choice: Some(Choice {
                stop_reason,
                message: Message::assistant_parts(parts),
                tool_calls,
            }),
            usage,
            model: resp.model,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// System messages are validated and left out; [`Provider::encode_request`]
    /// folds their text into the top-level `system` field.
    fn encode_messages(&self, messages: &[Message]) -> Result<Vec<serde_json::Value>, FatalError> {
        let mut encoded = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role == Role::System {
                message.validate()?;
                continue;
            }
            let api = Self::to_api_message(message)?;
            encoded.push(
                serde_json::to_value(api)
                    .map_err(|e| FatalError::InvalidMessageShape(e.to_string()))?,
            );
        }
        Ok(encoded)
    }

    fn decode_messages(&self, encoded: &[serde_json::Value]) -> Result<Vec<Message>, FatalError> {
        encoded
            .iter()
            .map(|value| {
                let api: AnthropicMessage =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        FatalError::InvalidMessageShape(format!("not an Anthropic message: {e}"))
                    })?;
                Self::from_api_message(api)
            })
            .collect()
    }

    fn encode_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect()
    }

    fn map_stop_reason(&self, raw: &str) -> Result<StopReason, FatalError> {
        match raw {
            "end_turn" => Ok(StopReason::Stop),
            "tool_use" => Ok(StopReason::ToolUse),
            "max_tokens" => Ok(StopReason::Length),
            "stop_sequence" => Ok(StopReason::StopSequence),
            other => Err(FatalError::UnknownStopReason {
                provider: self.name.clone(),
                reason: other.to_string(),
            }),
        }
    }

    fn encode_request(&self, request: &CompletionRequest) -> Result<serde_json::Value, FatalError> {
        let mut system_parts: Vec<String> = request.system_prompt.iter().cloned().collect();
        system_parts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(Message::text),
        );
        let api_messages = self.encode_messages(&request.messages)?;

        let max_tokens = request
            .max_tokens
            .or_else(|| self.models.get(&request.model).map(|m| m.max_output_tokens))
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": max_tokens,
        });

        if !system_parts.is_empty() {
            body["system"] = serde_json::json!(system_parts.join("\n\n"));
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(self.encode_tools(&request.tools));
        }

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        Ok(body)
    }

    async fn call(&self, body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(provider = "anthropic", model = %body["model"], "Sending completion request");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body);

        http::send_json(&self.name, request, &self.api_key).await
    }

    fn decode_response(&self, raw: serde_json::Value) -> Result<Completion, Error> {
        let resp: AnthropicResponse = serde_json::from_value(raw).map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;
        self.response_to_completion(resp)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-ant-test").unwrap()
    }

    fn transcript() -> Vec<Message> {
        vec![
            Message::user("Extract the people from this text."),
            Message::assistant_parts(vec![
                ContentPart::text("Creating entities"),
                ContentPart::tool_use("toolu_1", "create_entities", json!({"person": []})),
                ContentPart::tool_use("toolu_2", "abandon_entities", json!({"entityIds": [2]})),
            ]),
            Message::user_parts(vec![
                ContentPart::tool_error("toolu_1", "Tool not found"),
                ContentPart::ToolResult {
                    tool_use_id: "toolu_2".into(),
                    content: "accepted".into(),
                    is_error: None,
                },
                ContentPart::text("Please try again"),
            ]),
        ]
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = provider().with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn blocks_map_one_to_one() {
        let encoded = provider().encode_messages(&transcript()).unwrap();
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[1]["role"], "assistant");
        assert_eq!(encoded[1]["content"].as_array().unwrap().len(), 3);
        assert_eq!(encoded[1]["content"][1]["type"], "tool_use");
        assert_eq!(encoded[1]["content"][1]["input"], json!({"person": []}));
        assert_eq!(encoded[2]["content"][0]["type"], "tool_result");
        assert_eq!(encoded[2]["content"][0]["is_error"], true);
        assert!(encoded[2]["content"][1].get("is_error").is_none());
    }

    #[test]
    fn messages_round_trip() {
        let p = provider();
        let original = transcript();
        let decoded = p.decode_messages(&p.encode_messages(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decodes_plain_string_content() {
        let decoded = provider()
            .decode_messages(&[json!({"role": "user", "content": "Hello"})])
            .unwrap();
        assert_eq!(decoded, vec![Message::user("Hello")]);
    }

    #[test]
    fn message_codec_leaves_system_messages_to_the_system_field() {
        let encoded = provider()
            .encode_messages(&[Message::system("Be precise"), Message::user("Hi")])
            .unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0]["role"], "user");
        assert!(!encoded[0].to_string().contains("Be precise"));
    }

    #[test]
    fn malformed_system_message_is_still_rejected() {
        let system = Message {
            role: Role::System,
            content: vec![ContentPart::text("a"), ContentPart::text("b")],
        };
        let err = provider().encode_messages(&[system]).unwrap_err();
        assert!(matches!(err, FatalError::InvalidMessageShape(_)));
    }

    #[test]
    fn request_hoists_system_and_defaults_max_tokens() {
        let request = CompletionRequest::new(
            "claude-3-5-sonnet-20240620",
            vec![Message::system("Be precise"), Message::user("Hi")],
        )
        .with_system_prompt("You extract entities")
        .with_tools(vec![ToolDefinition::new(
            "create_entities",
            "Create",
            json!({"type": "object"}),
        )]);

        let body = provider().encode_request(&request).unwrap();
        assert_eq!(body["system"], "You extract entities\n\nBe precise");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn explicit_max_tokens_wins() {
        let request = CompletionRequest::new("claude-3-haiku-20240307", vec![Message::user("Hi")])
            .with_max_tokens(100);
        let body = provider().encode_request(&request).unwrap();
        assert_eq!(body["max_tokens"], 100);
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn stop_reason_mapping_is_exhaustive() {
        let p = provider();
        assert_eq!(p.map_stop_reason("end_turn").unwrap(), StopReason::Stop);
        assert_eq!(p.map_stop_reason("tool_use").unwrap(), StopReason::ToolUse);
        assert_eq!(p.map_stop_reason("max_tokens").unwrap(), StopReason::Length);
        assert_eq!(p.map_stop_reason("stop_sequence").unwrap(), StopReason::StopSequence);
        assert!(matches!(
            p.map_stop_reason("pause_turn"),
            Err(FatalError::UnknownStopReason { .. })
        ));
    }

    #[test]
    fn parse_tool_use_response() {
        let completion = provider()
            .decode_response(json!({
                "id": "msg_02",
                "model": "claude-3-haiku-20240307",
                "content": [
                    {"type": "text", "text": "Let me record that"},
                    {
                        "type": "tool_use",
                        "id": "toolu_abc",
                        "name": "create_entities",
                        "input": {"person": []}
                    }
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }))
            .unwrap();

        let choice = completion.choice.unwrap();
        assert_eq!(choice.stop_reason, StopReason::ToolUse);
        assert_eq!(choice.message.content.len(), 2);
        assert_eq!(choice.tool_calls.len(), 1);
        assert_eq!(choice.tool_calls[0].arguments, RawArguments::Json(json!({"person": []})));
        assert_eq!(completion.usage.total_tokens, 30);
    }

    #[test]
    fn empty_content_has_no_choice() {
        let completion = provider()
            .decode_response(json!({
                "model": "claude-3-haiku-20240307",
                "content": [],
                "usage": {"input_tokens": 5, "output_tokens": 0},
                "stop_reason": "end_turn"
            }))
            .unwrap();
        assert!(completion.choice.is_none());
    }

    #[test]
    fn unknown_stop_reason_in_response_is_fatal() {
        let err = provider()
            .decode_response(json!({
                "model": "m",
                "content": [{"type": "text", "text": "hi"}],
                "usage": {"input_tokens": 1, "output_tokens": 1},
                "stop_reason": "refusal"
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Fatal(FatalError::UnknownStopReason { .. })));
    }

    #[test]
    fn malformed_response_is_provider_error() {
        let err = provider().decode_response(json!({"unexpected": true})).unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-3-haiku-20240307",
                "content": [{"type": "text", "text": "Hello!"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider().with_base_url(server.uri());
        let request = CompletionRequest::new("claude-3-haiku-20240307", vec![Message::user("Hi")]);
        let completion = p.complete(&request).await.unwrap();
        let choice = completion.choice.unwrap();
        assert_eq!(choice.message.text(), "Hello!");
        assert_eq!(choice.stop_reason, StopReason::Stop);
    }

    #[tokio::test]
    async fn server_error_redacts_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("bad key sk-ant-test"))
            .mount(&server)
            .await;

        let p = provider().with_base_url(server.uri());
        let err = p.call(json!({"model": "m"})).await.unwrap_err();
        match err {
            ProviderError::ApiError { status_code, message } => {
                assert_eq!(status_code, 500);
                assert!(!message.contains("sk-ant-test"));
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let p = provider().with_base_url(server.uri());
        assert!(matches!(
            p.call(json!({})).await,
            Err(ProviderError::AuthenticationFailed(_))
        ));
    }
}
