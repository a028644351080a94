//! Context budgeting.
//!
//! Token counts are estimated at ~4 bytes per token over the
//! provider-encoded request. When the estimate plus the completion overhead
//! does not fit the model's context window, the tail of the designated user
//! message is cut until it does or the message is empty.

use hash_ai_core::error::FatalError;
use hash_ai_core::message::{ContentPart, Message, Role};
use hash_ai_core::provider::{CompletionRequest, Provider};
use serde_json::Value;
use tracing::{debug, warn};

/// Tokens reserved for the model's reply.
pub const DEFAULT_COMPLETION_OVERHEAD: u32 = 4096;

/// Extra tokens cut on each trim round so one round usually suffices.
const TRIM_MARGIN: u64 = 10;

const BYTES_PER_TOKEN: u64 = 4;
const MESSAGE_OVERHEAD: u64 = 4;

/// Estimate the token count for a string, rounding up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(BYTES_PER_TOKEN)
}

/// A request that fits, or could not be made to.
#[derive(Debug, Clone)]
pub struct BudgetedRequest {
    pub request: CompletionRequest,
    pub estimated_tokens: u64,
    pub trimmed_bytes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextBudgeter {
    overhead: u32,
}

impl Default for ContextBudgeter {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_OVERHEAD)
    }
}

impl ContextBudgeter {
    pub fn new(overhead: u32) -> Self {
        Self { overhead }
    }

    pub fn overhead(&self) -> u32 {
        self.overhead
    }

    /// Estimate the prompt size from the body the provider would send.
    ///
    /// Counts each entry of `messages`, a string `system` field and each
    /// entry of `tools`, so system text is counted wherever the provider
    /// places it.
    pub fn estimate(
        &self,
        provider: &dyn Provider,
        request: &CompletionRequest,
    ) -> Result<u64, FatalError> {
        let body = provider.encode_request(request)?;

        let messages: u64 = entries(&body, "messages")
            .map(|m| MESSAGE_OVERHEAD + estimate_tokens(&m.to_string()))
            .sum();

        let system = body
            .get("system")
            .and_then(Value::as_str)
            .map_or(0, |prompt| MESSAGE_OVERHEAD + estimate_tokens(prompt));

        let tools: u64 = entries(&body, "tools")
            .map(|t| estimate_tokens(&t.to_string()))
            .sum();

        Ok(messages + system + tools)
    }

    /// Trim `request.messages[trim_at]` until the prompt fits `context_window`.
    ///
    /// The request fits once `estimate + overhead < context_window`. A request
    /// that already fits is returned untouched. Otherwise each round cuts the
    /// excess plus `TRIM_MARGIN` tokens from the tail of the message, so a
    /// trimmed request ends at least that margin below the window.
    ///
    /// Without a trim index the request is returned unchanged even when it
    /// overflows; the provider will reject it.
    pub fn fit(
        &self,
        provider: &dyn Provider,
        mut request: CompletionRequest,
        context_window: u32,
        trim_at: Option<usize>,
    ) -> Result<BudgetedRequest, FatalError> {
        if let Some(index) = trim_at {
            match request.messages.get(index) {
                Some(message) if message.role == Role::User => {}
                _ => {
                    return Err(FatalError::InvalidMessageShape(format!(
                        "trim index {index} does not name a user message"
                    )));
                }
            }
        }

        let window = u64::from(context_window);
        let overhead = u64::from(self.overhead);
        let mut trimmed_bytes = 0;

        loop {
            let estimated_tokens = self.estimate(provider, &request)?;
            let required = estimated_tokens + overhead;
            if required < window {
                return Ok(BudgetedRequest {
                    request,
                    estimated_tokens,
                    trimmed_bytes,
                });
            }

            let Some(index) = trim_at else {
                warn!(
                    estimated_tokens,
                    context_window,
                    "Prompt exceeds the context window and no message may be trimmed"
                );
                return Ok(BudgetedRequest {
                    request,
                    estimated_tokens,
                    trimmed_bytes,
                });
            };

            let message = &mut request.messages[index];
            if message.text_len() == 0 {
                warn!(
                    estimated_tokens,
                    context_window,
                    index,
                    "Trimmed message is empty but the prompt still exceeds the window"
                );
                return Ok(BudgetedRequest {
                    request,
                    estimated_tokens,
                    trimmed_bytes,
                });
            }

            let excess = required - window;
            let cut =
                usize::try_from((excess + TRIM_MARGIN) * BYTES_PER_TOKEN).unwrap_or(usize::MAX);
            let removed = trim_tail(message, cut);
            trimmed_bytes += removed;
            debug!(excess, removed, index, "Trimmed message to fit context window");
        }
    }
}

fn entries<'a>(body: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> + use<'a> {
    body.get(field).and_then(Value::as_array).into_iter().flatten()
}

/// Remove up to `bytes` from the end of a message's text, on char boundaries.
fn trim_tail(message: &mut Message, bytes: usize) -> usize {
    let mut remaining = bytes;
    let mut removed = 0;

    for part in message.content.iter_mut().rev() {
        if remaining == 0 {
            break;
        }
        let ContentPart::Text { text } = part else { continue };

        if text.len() <= remaining {
            remaining -= text.len();
            removed += text.len();
            text.clear();
        } else {
            let mut keep = text.len() - remaining;
            while !text.is_char_boundary(keep) {
                keep -= 1;
            }
            removed += text.len() - keep;
            remaining = 0;
            text.truncate(keep);
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use hash_ai_core::error::{Error, ProviderError};
    use hash_ai_core::provider::{Completion, StopReason};
    use hash_ai_core::tool::ToolDefinition;
    use hash_ai_providers::AnthropicProvider;
    use serde_json::json;

    /// Encodes messages as `{"role","content"}` with joined text.
    struct PlainProvider;

    #[async_trait::async_trait]
    impl Provider for PlainProvider {
        fn name(&self) -> &str {
            "plain"
        }

        fn encode_messages(&self, messages: &[Message]) -> Result<Vec<Value>, FatalError> {
            Ok(messages
                .iter()
                .map(|m| json!({"role": m.role.to_string(), "content": m.text()}))
                .collect())
        }

        fn decode_messages(&self, _encoded: &[Value]) -> Result<Vec<Message>, FatalError> {
            Ok(Vec::new())
        }

        fn encode_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
            tools.iter().map(|t| json!({"name": t.name, "schema": t.input_schema})).collect()
        }

        fn map_stop_reason(&self, _raw: &str) -> Result<StopReason, FatalError> {
            Ok(StopReason::Stop)
        }

        fn encode_request(&self, request: &CompletionRequest) -> Result<Value, FatalError> {
            let mut body = json!({
                "model": request.model,
                "messages": self.encode_messages(&request.messages)?,
            });
            if let Some(prompt) = &request.system_prompt {
                body["system"] = json!(prompt);
            }
            if !request.tools.is_empty() {
                body["tools"] = json!(self.encode_tools(&request.tools));
            }
            Ok(body)
        }

        async fn call(&self, _body: Value) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }

        fn decode_response(&self, _raw: Value) -> Result<Completion, Error> {
            Err(Error::Internal("unused".into()))
        }
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn estimate_counts_messages_system_and_tools() {
        let budgeter = ContextBudgeter::default();
        let bare = CompletionRequest::new("m", vec![Message::user("hi")]);
        let base = budgeter.estimate(&PlainProvider, &bare).unwrap();
        // {"content":"hi","role":"user"} is 30 bytes
        assert_eq!(base, 4 + 8);

        let with_system = bare.clone().with_system_prompt("abcd");
        assert_eq!(budgeter.estimate(&PlainProvider, &with_system).unwrap(), base + 4 + 1);

        let tool = ToolDefinition::new("t", "d", json!({"type": "object"}));
        let with_tools = bare.with_tools(vec![tool]);
        assert!(budgeter.estimate(&PlainProvider, &with_tools).unwrap() > base);
    }

    #[test]
    fn system_messages_count_where_the_provider_puts_them() {
        let provider = AnthropicProvider::new("sk-ant-test").unwrap();
        let budgeter = ContextBudgeter::new(0);
        let rules = "r".repeat(4000);

        let bare = CompletionRequest::new("claude-3-haiku-20240307", vec![Message::user("hi")]);
        let mut with_rules = bare.clone();
        with_rules.messages.insert(0, Message::system(rules.clone()));

        let base = budgeter.estimate(&provider, &bare).unwrap();
        let counted = budgeter.estimate(&provider, &with_rules).unwrap();
        assert_eq!(counted, base + MESSAGE_OVERHEAD + estimate_tokens(&rules));

        let budgeted = budgeter.fit(&provider, with_rules, 200_000, Some(1)).unwrap();
        assert_eq!(budgeted.trimmed_bytes, 0);
        assert_eq!(budgeted.request.messages[0].text(), rules);
    }

    #[test]
    fn estimate_never_grows_as_the_message_shrinks() {
        let budgeter = ContextBudgeter::default();
        let text = "ab\"c\\dé\n".repeat(50);
        let mut previous = u64::MAX;

        for keep in (0..=text.len()).rev().filter(|&i| text.is_char_boundary(i)) {
            let request = CompletionRequest::new("m", vec![Message::user(&text[..keep])])
                .with_system_prompt("rules");
            let estimate = budgeter.estimate(&PlainProvider, &request).unwrap();
            assert!(estimate <= previous, "estimate rose to {estimate} at {keep} bytes");
            previous = estimate;
        }
    }

    #[test]
    fn trimmed_request_lands_strictly_below_the_window() {
        let budgeter = ContextBudgeter::new(100);
        for len in [1_000, 4_096, 4_100, 10_000] {
            let request = CompletionRequest::new("m", vec![Message::user("z".repeat(len))]);
            let budgeted = budgeter.fit(&PlainProvider, request, 1_000, Some(0)).unwrap();
            assert!(budgeted.estimated_tokens + 100 < 1_000);
            if budgeted.trimmed_bytes > 0 {
                assert!(budgeted.estimated_tokens + 100 + TRIM_MARGIN <= 1_000);
            }
        }
    }

    #[test]
    fn fitting_request_is_untouched() {
        let request = CompletionRequest::new("m", vec![Message::user("short")]);
        let budgeted = ContextBudgeter::default()
            .fit(&PlainProvider, request, 8192, Some(0))
            .unwrap();
        assert_eq!(budgeted.trimmed_bytes, 0);
        assert_eq!(budgeted.request.messages[0].text(), "short");
    }

    #[test]
    fn oversized_message_is_trimmed_to_fit() {
        let text = "x".repeat(200_000);
        let request =
            CompletionRequest::new("m", vec![Message::user(text)]).with_system_prompt("be brief");
        let budgeter = ContextBudgeter::default();

        let budgeted = budgeter.fit(&PlainProvider, request, 8192, Some(0)).unwrap();
        assert!(budgeted.trimmed_bytes > 0);
        assert!(budgeted.estimated_tokens + u64::from(budgeter.overhead()) < 8192);
        assert!(budgeted.request.messages[0].text_len() < 200_000);
        assert!(budgeted.request.messages[0].text().chars().all(|c| c == 'x'));
    }

    #[test]
    fn trims_only_the_designated_message() {
        let request = CompletionRequest::new(
            "m",
            vec![
                Message::user("a".repeat(40_000)),
                Message::assistant("ok"),
                Message::user("b".repeat(40_000)),
            ],
        );
        let budgeted = ContextBudgeter::new(1024)
            .fit(&PlainProvider, request, 12_000, Some(2))
            .unwrap();
        assert_eq!(budgeted.request.messages[0].text_len(), 40_000);
        assert!(budgeted.request.messages[2].text_len() < 40_000);
    }

    #[test]
    fn gives_up_when_message_is_empty() {
        let request = CompletionRequest::new(
            "m",
            vec![Message::user("a".repeat(1000)), Message::user("b".repeat(40_000))],
        );
        let budgeted = ContextBudgeter::default()
            .fit(&PlainProvider, request, 4096, Some(0))
            .unwrap();
        assert_eq!(budgeted.request.messages[0].text_len(), 0);
        assert_eq!(budgeted.request.messages[1].text_len(), 40_000);
    }

    #[test]
    fn without_trim_index_nothing_changes() {
        let request = CompletionRequest::new("m", vec![Message::user("a".repeat(40_000))]);
        let budgeted = ContextBudgeter::default()
            .fit(&PlainProvider, request, 4096, None)
            .unwrap();
        assert_eq!(budgeted.trimmed_bytes, 0);
    }

    #[test]
    fn trim_index_must_name_a_user_message() {
        let request =
            CompletionRequest::new("m", vec![Message::user("a"), Message::assistant("b")]);
        let budgeter = ContextBudgeter::default();
        assert!(budgeter.fit(&PlainProvider, request.clone(), 8192, Some(1)).is_err());
        assert!(budgeter.fit(&PlainProvider, request, 8192, Some(5)).is_err());
    }

    #[test]
    fn trim_respects_char_boundaries() {
        let mut message = Message::user("héllo wörld");
        let removed = trim_tail(&mut message, 5);
        let text = message.text();
        assert!(removed >= 5);
        assert!(text.len() + removed == "héllo wörld".len());
        assert!("héllo wörld".starts_with(&text));
    }
}
