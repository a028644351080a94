//! Dialogs against a mock Messages-style server.

use std::sync::Arc;

use hash_ai_core::message::Message;
use hash_ai_core::model::{ModelRegistry, ModelSpec, ProviderFamily};
use hash_ai_core::tool::ToolSet;
use hash_ai_inference::{DialogDriver, DialogRequest};
use hash_ai_providers::{AnthropicProvider, ProviderRouter};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "claude-test";

fn router(server: &MockServer, context_window: u32) -> Arc<ProviderRouter> {
    let models = ModelRegistry::empty().with_model(ModelSpec::new(
        MODEL,
        ProviderFamily::Anthropic,
        context_window,
        1024,
    ));
    let provider = AnthropicProvider::new("sk-ant-test").unwrap().with_base_url(server.uri());
    Arc::new(
        ProviderRouter::new(models).with_provider(ProviderFamily::Anthropic, Arc::new(provider)),
    )
}

async fn respond_once(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "model": MODEL,
            "content": [{"type": "text", "text": "Done."}],
            "usage": {"input_tokens": 40, "output_tokens": 2},
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn sent_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    requests[0].body_json().unwrap()
}

#[tokio::test]
async fn system_messages_in_the_transcript_reach_the_system_field() {
    let server = MockServer::start().await;
    respond_once(&server).await;

    let request = DialogRequest::new(
        MODEL,
        vec![Message::system("Answer in one word."), Message::user("Hi")],
        ToolSet::default(),
    )
    .with_system_prompt("You extract entities.")
    .with_trim_message_at_index(1);

    let driver = DialogDriver::new(router(&server, 200_000));
    let outcome = driver.run(request, &CancellationToken::new()).await.unwrap();

    assert!(outcome.response.is_ok());
    assert_eq!(outcome.calls, 1);

    let body = sent_body(&server).await;
    assert_eq!(body["system"], "You extract entities.\n\nAnswer in one word.");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn system_message_text_is_budgeted_before_trimming() {
    let server = MockServer::start().await;
    respond_once(&server).await;

    let rules = "r".repeat(4_000);
    let request = DialogRequest::new(
        MODEL,
        vec![Message::system(rules.clone()), Message::user("u".repeat(8_000))],
        ToolSet::default(),
    )
    .with_trim_message_at_index(1);

    // 6_000 tokens minus the default 4_096 reserved for the reply
    let driver = DialogDriver::new(router(&server, 6_000));
    let outcome = driver.run(request, &CancellationToken::new()).await.unwrap();
    assert!(outcome.response.is_ok());

    let body = sent_body(&server).await;
    assert_eq!(body["system"], rules.as_str());
    let sent = body["messages"][0].to_string().len();
    assert!(sent > 0);
    assert!(rules.len() + sent < 4 * (6_000 - 4_096));
}
