//! The LLM dialog driver.
//!
//! Runs the call → validate → reply-with-errors loop against one provider.
//! Every tool call the model emits is validated; if any is malformed, the
//! assistant turn and a user turn of error results are appended and the
//! model is asked again, up to the retry limit.

use std::sync::Arc;

use hash_ai_config::InferenceConfig;
use hash_ai_core::error::{Error, FatalError};
use hash_ai_core::message::{ContentPart, Message, validate_all};
use hash_ai_core::provider::{Choice, Completion, CompletionRequest, Provider, StopReason, Usage};
use hash_ai_core::response::LlmResponse;
use hash_ai_core::tool::{ParsedToolCall, ToolSet};
use hash_ai_providers::ProviderRouter;
use thiserror::Error as ThisError;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::budget::ContextBudgeter;
use crate::validator::{self, CallOutcome};

pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

const NO_RESPONSE: &str = "No response was provided by the model";
const MISSING_TOOL_CALLS: &str =
    "You indicated \"tool_calls\" as the finish reason, but no tool calls were made.";
const DISCARDED_CALL: &str = "\
    This call was valid but has been discarded because other calls in the same turn failed. \
    Emit it again together with the corrected calls.";

/// Failures that end a dialog without an [`LlmResponse`].
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum DriverError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("Dialog was cancelled")]
    Cancelled,
}

/// Everything needed to run one dialog.
#[derive(Debug, Clone)]
pub struct DialogRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: ToolSet,
    /// Index into `messages` of the user message that may be trimmed.
    pub trim_message_at_index: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl DialogRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, tools: ToolSet) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            messages,
            tools,
            trim_message_at_index: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_trim_message_at_index(mut self, index: usize) -> Self {
        self.trim_message_at_index = Some(index);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The result of a dialog together with the transcript that produced it.
#[derive(Debug, Clone)]
pub struct DialogOutcome {
    pub response: LlmResponse,
    /// Caller messages plus every turn the driver appended.
    pub transcript: Vec<Message>,
    pub retry_count: u32,
    /// Provider calls made, including the one that failed, if any.
    pub calls: u32,
    /// Usage summed over every call.
    pub total_usage: Usage,
}

/// What one provider reply means for the loop.
enum Turn {
    Done {
        stop_reason: StopReason,
        message: Message,
        tool_calls: Vec<ParsedToolCall>,
    },
    Retry {
        assistant: Option<Message>,
        reply: Message,
        reason: String,
    },
}

/// Drives a dialog against the provider that serves the requested model.
pub struct DialogDriver {
    router: Arc<ProviderRouter>,
    budgeter: ContextBudgeter,
    max_retry_count: u32,
    semaphore: Option<Arc<Semaphore>>,
    aggregate_usage: bool,
}

impl DialogDriver {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self {
            router,
            budgeter: ContextBudgeter::default(),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            semaphore: None,
            aggregate_usage: false,
        }
    }

    /// Build a driver from the `[inference]` section.
    pub fn from_config(router: Arc<ProviderRouter>, config: &InferenceConfig) -> Self {
        Self::new(router)
            .with_max_retry_count(config.max_retry_count)
            .with_budgeter(ContextBudgeter::new(config.completion_overhead))
            .with_semaphore(Arc::new(Semaphore::new(config.max_concurrent_requests)))
            .with_aggregate_usage(config.aggregate_usage)
    }

    pub fn with_max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    pub fn with_budgeter(mut self, budgeter: ContextBudgeter) -> Self {
        self.budgeter = budgeter;
        self
    }

    /// Bound outbound requests; the semaphore may be shared between drivers.
    pub fn with_semaphore(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.semaphore = Some(semaphore);
        self
    }

    pub fn with_aggregate_usage(mut self, aggregate: bool) -> Self {
        self.aggregate_usage = aggregate;
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Run the dialog until the model answers with valid tool calls, the
    /// provider fails, or retries run out.
    pub async fn run(
        &self,
        request: DialogRequest,
        cancel: &CancellationToken,
    ) -> Result<DialogOutcome, DriverError> {
        validate_all(&request.messages)?;
        validator::prepare(&request.tools)?;

        let (provider, spec) = match self.router.resolve(&request.model) {
            Ok(resolved) => resolved,
            Err(Error::Fatal(e)) => return Err(e.into()),
            Err(e) => {
                warn!(model = %request.model, error = %e, "No provider available for model");
                return Ok(DialogOutcome {
                    response: LlmResponse::ApiError { message: e.to_string() },
                    transcript: request.messages,
                    retry_count: 0,
                    calls: 0,
                    total_usage: Usage::default(),
                });
            }
        };

        let tool_definitions = request.tools.definitions().to_vec();
        let mut transcript = request.messages;
        let mut retry_count = 0;
        let mut calls = 0;
        let mut total_usage = Usage::default();

        info!(
            model = %request.model,
            provider = provider.name(),
            messages = transcript.len(),
            tools = tool_definitions.len(),
            "Starting dialog"
        );

        loop {
            let completion_request = CompletionRequest {
                model: request.model.clone(),
                system_prompt: request.system_prompt.clone(),
                messages: transcript.clone(),
                tools: tool_definitions.clone(),
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            };
            let budgeted = self.budgeter.fit(
                provider.as_ref(),
                completion_request,
                spec.context_window,
                request.trim_message_at_index,
            )?;

            calls += 1;
            debug!(call = calls, estimated_tokens = budgeted.estimated_tokens, "Calling provider");

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(model = %request.model, calls, "Dialog cancelled");
                    return Err(DriverError::Cancelled);
                }
                result = self.send(provider.as_ref(), &budgeted.request) => result,
            };

            let completion = match result {
                Ok(completion) => completion,
                Err(Error::Fatal(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(model = %request.model, calls, error = %e, "Provider call failed");
                    return Ok(DialogOutcome {
                        response: LlmResponse::ApiError { message: e.to_string() },
                        transcript,
                        retry_count,
                        calls,
                        total_usage,
                    });
                }
            };

            total_usage = total_usage.combine(completion.usage);
            let delta = i64::from(completion.usage.input_tokens) - budgeted.estimated_tokens as i64;
            info!(
                estimated = budgeted.estimated_tokens,
                actual = completion.usage.input_tokens,
                "Estimated prompt usage off by {delta} tokens"
            );

            let turn_usage = completion.usage;
            match inspect(completion, &request.tools) {
                Turn::Done {
                    stop_reason,
                    message,
                    tool_calls,
                } => {
                    info!(
                        model = %request.model,
                        stop_reason = %stop_reason,
                        tool_calls = tool_calls.len(),
                        retry_count,
                        "Dialog complete"
                    );
                    transcript.push(message.clone());
                    let usage = if self.aggregate_usage { total_usage } else { turn_usage };
                    return Ok(DialogOutcome {
                        response: LlmResponse::Ok {
                            stop_reason,
                            message,
                            usage,
                            tool_calls,
                        },
                        transcript,
                        retry_count,
                        calls,
                        total_usage,
                    });
                }
                Turn::Retry {
                    assistant,
                    reply,
                    reason,
                } => {
                    if retry_count >= self.max_retry_count {
                        warn!(
                            model = %request.model,
                            retry_count,
                            reason = %reason,
                            "Exceeded maximum retries"
                        );
                        return Ok(DialogOutcome {
                            response: LlmResponse::ExceededMaximumRetries { retry_count },
                            transcript,
                            retry_count,
                            calls,
                            total_usage,
                        });
                    }

                    retry_count += 1;
                    info!(
                        model = %request.model,
                        retry_count,
                        reason = %reason,
                        "Asking the model to retry"
                    );
                    transcript.extend(assistant);
                    transcript.push(reply);
                }
            }
        }
    }

    async fn send(
        &self,
        provider: &dyn Provider,
        request: &CompletionRequest,
    ) -> Result<Completion, Error> {
        let _permit = match &self.semaphore {
            Some(semaphore) => Some(
                semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::Internal("request limiter closed".into()))?,
            ),
            None => None,
        };
        provider.complete(request).await
    }
}

fn inspect(completion: Completion, tools: &ToolSet) -> Turn {
    let Some(Choice {
        stop_reason,
        message,
        tool_calls,
    }) = completion.choice
    else {
        return Turn::Retry {
            assistant: None,
            reply: Message::user(NO_RESPONSE),
            reason: "empty_response".into(),
        };
    };

    let outcomes = validator::validate_tool_calls(&tool_calls, tools);

    if outcomes.iter().any(|outcome| !outcome.is_valid()) {
        let mut kinds = Vec::new();
        let results = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                CallOutcome::Valid(call) => ContentPart::tool_error(call.id, DISCARDED_CALL),
                CallOutcome::Invalid { id, name, error } => {
                    debug!(tool = %name, id = %id, kind = error.kind(), "Rejected tool call");
                    kinds.push(error.kind());
                    ContentPart::tool_error(id, error.to_model_text())
                }
            })
            .collect();
        return Turn::Retry {
            assistant: Some(message),
            reply: Message::user_parts(results),
            reason: kinds.join(","),
        };
    }

    if stop_reason == StopReason::ToolUse && outcomes.is_empty() {
        let assistant = (!message.content.is_empty()).then_some(message);
        return Turn::Retry {
            assistant,
            reply: Message::user(MISSING_TOOL_CALLS),
            reason: "missing_tool_call_after_tool_use_stop".into(),
        };
    }

    let tool_calls = outcomes
        .into_iter()
        .filter_map(|outcome| match outcome {
            CallOutcome::Valid(call) => Some(call),
            CallOutcome::Invalid { .. } => None,
        })
        .collect();

    Turn::Done {
        stop_reason,
        message,
        tool_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hash_ai_core::model::{ModelRegistry, ModelSpec, ProviderFamily};
    use hash_ai_core::provider::{RawArguments, RawToolCall};
    use hash_ai_core::tool::ToolDefinition;
    use serde_json::json;

    fn tools() -> ToolSet {
        ToolSet::new(vec![ToolDefinition::new(
            "note",
            "Record a note",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        )])
        .unwrap()
    }

    fn completion(
        stop_reason: StopReason,
        message: Message,
        tool_calls: Vec<RawToolCall>,
    ) -> Completion {
        Completion {
            choice: Some(Choice {
                stop_reason,
                message,
                tool_calls,
            }),
            usage: Usage::new(10, 5),
            model: "m".into(),
        }
    }

    fn models() -> ModelRegistry {
        ModelRegistry::empty().with_model(ModelSpec::new("m", ProviderFamily::OpenAi, 8192, 1024))
    }

    fn raw(id: &str, name: &str, input: serde_json::Value) -> RawToolCall {
        RawToolCall {
            id: id.into(),
            name: name.into(),
            arguments: RawArguments::Json(input),
        }
    }

    #[test]
    fn plain_stop_is_done() {
        let turn = inspect(
            completion(StopReason::Stop, Message::assistant("hello"), vec![]),
            &tools(),
        );
        assert!(matches!(turn, Turn::Done { stop_reason: StopReason::Stop, .. }));
    }

    #[test]
    fn no_choice_asks_again() {
        let empty = Completion {
            choice: None,
            usage: Usage::default(),
            model: "m".into(),
        };
        let Turn::Retry { assistant, reply, .. } = inspect(empty, &tools()) else {
            panic!("expected a retry");
        };
        assert!(assistant.is_none());
        assert_eq!(reply.text(), NO_RESPONSE);
    }

    #[test]
    fn tool_use_without_calls_asks_again() {
        let turn = inspect(
            completion(StopReason::ToolUse, Message::assistant("thinking"), vec![]),
            &tools(),
        );
        let Turn::Retry { assistant, reply, .. } = turn else {
            panic!("expected a retry");
        };
        assert_eq!(assistant.map(|m| m.text()), Some("thinking".to_string()));
        assert_eq!(reply.text(), MISSING_TOOL_CALLS);
    }

    #[test]
    fn invalid_sibling_discards_valid_calls() {
        let message = Message::assistant_parts(vec![
            ContentPart::tool_use("a", "note", json!({"text": "ok"})),
            ContentPart::tool_use("b", "note", json!({})),
        ]);
        let calls = vec![raw("a", "note", json!({"text": "ok"})), raw("b", "note", json!({}))];
        let turn = inspect(completion(StopReason::ToolUse, message, calls), &tools());
        let Turn::Retry {
            assistant,
            reply,
            reason,
        } = turn
        else {
            panic!("expected a retry");
        };

        assert!(assistant.is_some());
        assert_eq!(reason, "schema_validation_failed");
        let ids: Vec<_> = reply
            .content
            .iter()
            .map(|part| match part {
                ContentPart::ToolResult {
                    tool_use_id, is_error, ..
                } => (tool_use_id.as_str(), *is_error),
                other => panic!("unexpected part {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![("a", Some(true)), ("b", Some(true))]);
    }

    #[test]
    fn valid_calls_are_returned_in_order() {
        let calls = vec![
            raw("1", "note", json!({"text": "x"})),
            raw("2", "note", json!({"text": "y"})),
        ];
        let turn = inspect(
            completion(StopReason::ToolUse, Message::assistant("."), calls),
            &tools(),
        );
        let Turn::Done { tool_calls, .. } = turn else {
            panic!("expected completion");
        };
        let ids: Vec<_> = tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn unknown_model_is_fatal() {
        let router = Arc::new(ProviderRouter::new(ModelRegistry::empty()));
        let driver = DialogDriver::new(router);
        let request = DialogRequest::new("nope", vec![Message::user("hi")], tools());
        let err = driver.run(request, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, DriverError::Fatal(FatalError::UnknownModel("nope".into())));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_api_error() {
        let driver = DialogDriver::new(Arc::new(ProviderRouter::new(models())));
        let request = DialogRequest::new("m", vec![Message::user("hi")], tools());
        let outcome = driver.run(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.response.status(), "api-error");
        assert_eq!(outcome.calls, 0);
    }

    #[tokio::test]
    async fn malformed_transcript_is_fatal() {
        let driver = DialogDriver::new(Arc::new(ProviderRouter::new(models())));
        let messages =
            vec![Message::user_parts(vec![ContentPart::tool_use("x", "note", json!({}))])];
        let err = driver
            .run(DialogRequest::new("m", messages, tools()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Fatal(FatalError::InvalidMessageShape(_))));
    }
}
