use std::sync::Arc;

use async_trait::async_trait;
use hash_ai_inference::{EntityInference, InferEntitiesError, InferEntitiesRequest};
use hash_ai_telemetry::UsageReporter;
use serde_json::Value;

use super::record_usage;
use crate::activity::{Activity, ActivityContext, ActivityError};

pub const INFER_ENTITIES: &str = "inferEntities";

/// Proposes entities of the given types from free text.
pub struct InferEntitiesActivity {
    inference: EntityInference,
    usage: Option<Arc<UsageReporter>>,
}

impl InferEntitiesActivity {
    pub fn new(inference: EntityInference) -> Self {
        Self { inference, usage: None }
    }

    pub fn with_usage_reporter(mut self, reporter: Arc<UsageReporter>) -> Self {
        self.usage = Some(reporter);
        self
    }
}

#[async_trait]
impl Activity for InferEntitiesActivity {
    fn name(&self) -> &'static str {
        INFER_ENTITIES
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let request: InferEntitiesRequest =
            serde_json::from_value(input).map_err(|e| ActivityError::InvalidInput(e.to_string()))?;
        let model = request.model.clone();

        let (result, outcome) = self
            .inference
            .infer(request, &ctx.cancel)
            .await
            .map_err(|e| match e {
                InferEntitiesError::Schema(e) => ActivityError::InvalidInput(e.to_string()),
                InferEntitiesError::Driver(e) => e.into(),
            })?;

        if let Some(usage) = outcome.response.usage() {
            record_usage(
                self.usage.as_deref(),
                self.inference.driver().router(),
                INFER_ENTITIES,
                ctx,
                &model,
                usage,
                outcome.retry_count,
            )
            .await;
        }

        serde_json::to_value(&result).map_err(|e| ActivityError::Failed(e.to_string()))
    }
}
