//! OpenAI Chat-Completions provider implementation.
//!
//! Works with OpenAI and any endpoint exposing a compatible
//! `/chat/completions` API.
//!
//! Canonical ↔ wire mapping:
//! - an assistant message's tool_use parts become one `tool_calls` array, in
//!   order, with `arguments` serialized to a JSON string
//! - each tool_result part of a user message becomes its own `role=tool`
//!   message, emitted before the user's text so results directly follow the
//!   assistant turn that produced the calls
//! - `is_error` has no wire representation and is dropped
//! - arguments that are not a JSON object are carried verbatim as a string

use std::time::Duration;

use async_trait::async_trait;
use hash_ai_core::error::{Error, FatalError, ProviderError};
use hash_ai_core::message::{ContentPart, Message, Role};
use hash_ai_core::provider::*;
use hash_ai_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::http;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// An OpenAI-compatible Chat-Completions provider.
pub struct OpenAiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a new provider against the public OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "openai".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: http::client(DEFAULT_TIMEOUT)?,
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

    /// Text parts → wire content: none, a plain string, or an array of text parts.
    fn to_api_content(parts: &[ContentPart]) -> Option<ApiContent> {
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        match texts.as_slice() {
            [] => None,
            [single] => Some(ApiContent::Text(single.to_string())),
            many => Some(ApiContent::Parts(
                many.iter()
                    .map(|t| ApiContentPart {
                        r#type: "text".into(),
                        text: t.to_string(),
                    })
                    .collect(),
            )),
        }
    }

    fn from_api_content(content: Option<ApiContent>) -> Vec<ContentPart> {
        match content {
            None => Vec::new(),
            Some(ApiContent::Text(text)) if text.is_empty() => Vec::new(),
            Some(ApiContent::Text(text)) => vec![ContentPart::Text { text }],
            Some(ApiContent::Parts(parts)) => parts
                .into_iter()
                .filter(|p| p.r#type == "text")
                .map(|p| ContentPart::Text { text: p.text })
                .collect(),
        }
    }

    /// Canonical tool input → `arguments` string.
    fn encode_arguments(input: &serde_json::Value) -> String {
        match input {
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }

    /// `arguments` string → canonical tool input.
    fn decode_arguments(arguments: &str) -> serde_json::Value {
        match serde_json::from_str::<serde_json::Value>(arguments) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            _ => serde_json::Value::String(arguments.to_string()),
        }
    }

    fn to_api_messages(message: &Message) -> Result<Vec<ApiMessage>, FatalError> {
        message.validate()?;
        let encoded = match message.role {
            Role::System => vec![ApiMessage::new("system", Self::to_api_content(&message.content))],
            Role::Assistant => {
                let tool_calls: Vec<ApiToolCall> = message
                    .tool_uses()
                    .map(|(id, name, input)| ApiToolCall {
                        id: id.to_string(),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: name.to_string(),
                            arguments: Self::encode_arguments(input),
                        },
                    })
                    .collect();
                let mut api = ApiMessage::new("assistant", Self::to_api_content(&message.content));
                if !tool_calls.is_empty() {
                    api.tool_calls = Some(tool_calls);
                }
                vec![api]
            }
            Role::User => {
                let mut out = Vec::new();
                for part in &message.content {
                    if let ContentPart::ToolResult {
                        tool_use_id, content, ..
                    } = part
                    {
                        let content = Some(ApiContent::Text(content.clone()));
                        let mut api = ApiMessage::new("tool", content);
                        api.tool_call_id = Some(tool_use_id.clone());
                        out.push(api);
                    }
                }
                let text = Self::to_api_content(&message.content);
                if text.is_some() || out.is_empty() {
                    out.push(ApiMessage::new(
                        "user",
                        Some(text.unwrap_or_else(|| ApiContent::Text(String::new()))),
                    ));
                }
                out
            }
        };
        Ok(encoded)
    }

    /// Convert an OpenAI API response to a canonical completion.
    fn response_to_completion(&self, resp: ApiResponse) -> Result<Completion, Error> {
        let usage = match resp.usage {
            Some(u) => Usage::new(u.prompt_tokens, u.completion_tokens),
            None => {
                warn!(provider = %self.name, "Response carries no usage");
                Usage::default()
            }
        };

        if resp.choices.len() > 1 {
            return Err(FatalError::UnexpectedMessageCount {
                expected: 1,
                actual: resp.choices.len(),
            }
            .into());
        }

        let Some(choice) = resp.choices.into_iter().next() else {
            return Ok(Completion {
                choice: None,
                usage,
                model: resp.model,
            });
        };

        let raw_reason = choice.finish_reason.ok_or_else(|| {
            ProviderError::InvalidResponse("choice carries no finish_reason".into())
        })?;
        let stop_reason = self.map_stop_reason(&raw_reason)?;

        let mut parts = Self::from_api_content(choice.message.content.map(ApiContent::Text));
        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            parts.push(ContentPart::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: Self::decode_arguments(&call.function.arguments),
            });
            tool_calls.push(RawToolCall {
                id: call.id,
                name: call.function.name,
                arguments: RawArguments::Text(call.function.arguments),
            });
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
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode_messages(&self, messages: &[Message]) -> Result<Vec<serde_json::Value>, FatalError> {
        let mut encoded = Vec::with_capacity(messages.len());
        for message in messages {
            for api in Self::to_api_messages(message)? {
                encoded.push(
                    serde_json::to_value(api)
                        .map_err(|e| FatalError::InvalidMessageShape(e.to_string()))?,
                );
            }
        }
        Ok(encoded)
    }

    fn decode_messages(&self, encoded: &[serde_json::Value]) -> Result<Vec<Message>, FatalError> {
        let mut messages = Vec::new();
        let mut pending_results: Vec<ContentPart> = Vec::new();

        let flush = |pending: &mut Vec<ContentPart>, messages: &mut Vec<Message>| {
            if !pending.is_empty() {
                messages.push(Message::user_parts(std::mem::take(pending)));
            }
        };

        for value in encoded {
            let api: ApiMessage = serde_json::from_value(value.clone())
                .map_err(|e| FatalError::InvalidMessageShape(format!("not a chat message: {e}")))?;

            match api.role.as_str() {
                "tool" => {
                    let tool_use_id = api.tool_call_id.ok_or_else(|| {
                        FatalError::InvalidMessageShape("tool message without tool_call_id".into())
                    })?;
                    let content = Self::from_api_content(api.content)
                        .into_iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => text,
                            _ => String::new(),
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    pending_results.push(ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        is_error: None,
                    });
                }
                "user" => {
                    let mut parts = std::mem::take(&mut pending_results);
                    parts.extend(Self::from_api_content(api.content));
                    messages.push(Message::user_parts(parts));
                }
                "assistant" => {
                    flush(&mut pending_results, &mut messages);
                    let mut parts = Self::from_api_content(api.content);
                    for call in api.tool_calls.unwrap_or_default() {
                        parts.push(ContentPart::ToolUse {
                            input: Self::decode_arguments(&call.function.arguments),
                            id: call.id,
                            name: call.function.name,
                        });
                    }
                    messages.push(Message::assistant_parts(parts));
                }
                "system" => {
                    flush(&mut pending_results, &mut messages);
                    let text = Self::from_api_content(api.content)
                        .into_iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => text,
                            _ => String::new(),
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    messages.push(Message::system(text));
                }
                other => {
                    return Err(FatalError::InvalidMessageShape(format!(
                        "unexpected chat role {other:?}"
                    )));
                }
            }
        }
        flush(&mut pending_results, &mut messages);
        Ok(messages)
    }

    fn encode_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect()
    }

    fn map_stop_reason(&self, raw: &str) -> Result<StopReason, FatalError> {
        match raw {
            "stop" => Ok(StopReason::Stop),
            "tool_calls" => Ok(StopReason::ToolUse),
            "length" => Ok(StopReason::Length),
            "content_filter" => Ok(StopReason::ContentFilter),
            other => Err(FatalError::UnknownStopReason {
                provider: self.name.clone(),
                reason: other.to_string(),
            }),
        }
    }

    fn encode_request(&self, request: &CompletionRequest) -> Result<serde_json::Value, FatalError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(prompt) = &request.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": prompt}));
        }
        messages.extend(self.encode_messages(&request.messages)?);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(self.encode_tools(&request.tools));
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        Ok(body)
    }

    async fn call(&self, body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.name, model = %body["model"], "Sending completion request");

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);

        http::send_json(&self.name, request, &self.api_key).await
    }

    fn decode_response(&self, raw: serde_json::Value) -> Result<Completion, Error> {
        let resp: ApiResponse = serde_json::from_value(raw)
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;
        self.response_to_completion(resp)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<ApiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn new(role: &str, content: Option<ApiContent>) -> Self {
        Self {
            role: role.into(),
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContentPart {
    r#type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("sk-test").unwrap()
    }

    fn chat_response(finish_reason: &str, message: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        })
    }

    #[test]
    fn constructor_with_base_url() {
        let p = provider().with_base_url("http://localhost:8080/v1/");
        assert_eq!(p.base_url, "http://localhost:8080/v1");
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn assistant_tool_calls_preserve_order_and_ids() {
        let message = Message::assistant_parts(vec![
            ContentPart::tool_use("call_b", "create_entities", json!({"person": []})),
            ContentPart::tool_use("call_a", "abandon_entities", json!({"entityIds": [1]})),
        ]);
        let encoded = provider().encode_messages(&[message]).unwrap();
        assert_eq!(encoded.len(), 1);
        let calls = encoded[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls[0]["id"], "call_b");
        assert_eq!(calls[1]["id"], "call_a");
        assert_eq!(calls[0]["type"], "function");
        assert_eq!(calls[1]["function"]["arguments"], r#"{"entityIds":[1]}"#);
        assert!(encoded[0].get("content").is_none());
    }

    #[test]
    fn each_tool_result_becomes_a_tool_message_before_text() {
        let message = Message::user_parts(vec![
            ContentPart::text("Please fix these"),
            ContentPart::tool_error("call_1", "Tool not found"),
            ContentPart::tool_error("call_2", "bad json"),
        ]);
        let encoded = provider().encode_messages(&[message]).unwrap();
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[0]["role"], "tool");
        assert_eq!(encoded[0]["tool_call_id"], "call_1");
        assert_eq!(encoded[1]["tool_call_id"], "call_2");
        assert_eq!(encoded[2]["role"], "user");
        assert_eq!(encoded[2]["content"], "Please fix these");
    }

    #[test]
    fn round_trip_modulo_error_flag() {
        let p = provider();
        let original = vec![
            Message::system("rules"),
            Message::user("text to analyse"),
            Message::assistant_parts(vec![
                ContentPart::text("Working"),
                ContentPart::tool_use("call_1", "create_entities", json!({"person": []})),
                ContentPart::tool_use("call_2", "create_entities", json!("{ not json")),
            ]),
            Message::user_parts(vec![
                ContentPart::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: "valid".into(),
                    is_error: None,
                },
                ContentPart::ToolResult {
                    tool_use_id: "call_2".into(),
                    content: "Your JSON arguments could not be parsed".into(),
                    is_error: None,
                },
                ContentPart::text("first"),
                ContentPart::text("second"),
            ]),
        ];
        let encoded = p.encode_messages(&original).unwrap();
        assert_eq!(encoded[2]["tool_calls"][1]["function"]["arguments"], "{ not json");
        let decoded = p.decode_messages(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn error_flag_is_not_representable() {
        let p = provider();
        let original = vec![Message::user_parts(vec![ContentPart::tool_error("c", "oops")])];
        let decoded = p.decode_messages(&p.encode_messages(&original).unwrap()).unwrap();
        match &decoded[0].content[0] {
            ContentPart::ToolResult { is_error, content, .. } => {
                assert_eq!(*is_error, None);
                assert_eq!(content, "oops");
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn stop_reason_mapping_is_exhaustive() {
        let p = provider();
        assert_eq!(p.map_stop_reason("stop").unwrap(), StopReason::Stop);
        assert_eq!(p.map_stop_reason("tool_calls").unwrap(), StopReason::ToolUse);
        assert_eq!(p.map_stop_reason("length").unwrap(), StopReason::Length);
        assert_eq!(p.map_stop_reason("content_filter").unwrap(), StopReason::ContentFilter);
        assert!(p.map_stop_reason("function_call").is_err());
    }

    #[test]
    fn request_body_shape() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("Hi")])
            .with_system_prompt("Extract entities")
            .with_tools(vec![ToolDefinition::new(
                "create_entities",
                "Create",
                json!({"type": "object"}),
            )]);
        let body = provider().encode_request(&request).unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn parse_tool_calls_response() {
        let completion = provider()
            .decode_response(chat_response(
                "tool_calls",
                json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "create_entities", "arguments": "{\"person\":[]}"}
                        },
                        {
                            "id": "call_2",
                            "type": "function",
                            "function": {"name": "create_entities", "arguments": "{ not json"}
                        }
                    ]
                }),
            ))
            .unwrap();

        let choice = completion.choice.unwrap();
        assert_eq!(choice.stop_reason, StopReason::ToolUse);
        assert_eq!(choice.tool_calls.len(), 2);
        assert_eq!(choice.tool_calls[1].arguments, RawArguments::Text("{ not json".into()));
        let inputs: Vec<_> =
            choice.message.tool_uses().map(|(_, _, input)| input.clone()).collect();
        assert_eq!(inputs[0], json!({"person": []}));
        assert_eq!(inputs[1], json!("{ not json"));
        assert_eq!(completion.usage, Usage::new(100, 20));
    }

    #[test]
    fn zero_choices_has_no_choice() {
        let completion = provider()
            .decode_response(json!({
                "model": "gpt-4o",
                "choices": [],
                "usage": {"prompt_tokens": 1, "completion_tokens": 0}
            }))
            .unwrap();
        assert!(completion.choice.is_none());
    }

    #[test]
    fn multiple_choices_are_fatal() {
        let message = json!({"role": "assistant", "content": "a"});
        let err = provider()
            .decode_response(json!({
                "model": "gpt-4o",
                "choices": [
                    {"message": message.clone(), "finish_reason": "stop"},
                    {"message": message, "finish_reason": "stop"}
                ]
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Fatal(FatalError::UnexpectedMessageCount { actual: 2, .. })));
    }

    #[test]
    fn unknown_finish_reason_is_fatal() {
        let err = provider()
            .decode_response(chat_response(
                "function_call",
                json!({"role": "assistant", "content": "x"}),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Fatal(FatalError::UnknownStopReason { .. })));
    }

    #[tokio::test]
    async fn complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
                "stop",
                json!({"role": "assistant", "content": "Hello!"}),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider().with_base_url(server.uri());
        let completion = p
            .complete(&CompletionRequest::new("gpt-4o", vec![Message::user("Hi")]))
            .await
            .unwrap();
        assert_eq!(completion.choice.unwrap().message.text(), "Hello!");
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let p = provider().with_base_url(server.uri());
        assert!(matches!(
            p.call(json!({"model": "gpt-4o"})).await,
            Err(ProviderError::RateLimited { retry_after_secs: 12 })
        ));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let p = provider()
            .with_base_url(server.uri())
            .with_timeout(Duration::from_millis(50))
            .unwrap();
        assert!(matches!(
            p.call(json!({"model": "gpt-4o"})).await,
            Err(ProviderError::Timeout(_))
        ));
    }
}
