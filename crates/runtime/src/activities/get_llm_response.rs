use std::sync::Arc;

use async_trait::async_trait;
use hash_ai_core::message::Message;
use hash_ai_core::tool::{ToolDefinition, ToolSet};
use hash_ai_inference::{DialogDriver, DialogRequest};
use hash_ai_telemetry::UsageReporter;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::record_usage;
use crate::activity::{Activity, ActivityContext, ActivityError};

pub const GET_LLM_RESPONSE: &str = "getLlmResponse";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLlmResponseInput {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub trim_message_at_index: Option<usize>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Runs one dialog and returns the tagged LLM response.
pub struct GetLlmResponseActivity {
    driver: Arc<DialogDriver>,
    usage: Option<Arc<UsageReporter>>,
}

impl GetLlmResponseActivity {
    pub fn new(driver: Arc<DialogDriver>) -> Self {
        Self { driver, usage: None }
    }

    pub fn with_usage_reporter(mut self, reporter: Arc<UsageReporter>) -> Self {
        self.usage = Some(reporter);
        self
    }
}

#[async_trait]
impl Activity for GetLlmResponseActivity {
    fn name(&self) -> &'static str {
        GET_LLM_RESPONSE
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: GetLlmResponseInput =
            serde_json::from_value(input).map_err(|e| ActivityError::InvalidInput(e.to_string()))?;
        let tools =
            ToolSet::new(input.tools).map_err(|e| ActivityError::InvalidInput(e.to_string()))?;

        let model = input.model;
        let mut request = DialogRequest::new(&model, input.messages, tools);
        request.system_prompt = input.system_prompt;
        request.trim_message_at_index = input.trim_message_at_index;
        request.max_tokens = input.max_tokens;
        request.temperature = input.temperature;

        info!(task_id = %ctx.task_id, model = %model, "Getting LLM response");
        let outcome = self.driver.run(request, &ctx.cancel).await?;

        if let Some(usage) = outcome.response.usage() {
            record_usage(
                self.usage.as_deref(),
                self.driver.router(),
                GET_LLM_RESPONSE,
                ctx,
                &model,
                usage,
                outcome.retry_count,
            )
            .await;
        }

        serde_json::to_value(&outcome.response).map_err(|e| ActivityError::Failed(e.to_string()))
    }
}
