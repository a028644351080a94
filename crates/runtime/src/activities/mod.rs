//! The activities this worker serves.

mod get_llm_response;
mod infer_entities;

pub use get_llm_response::{GET_LLM_RESPONSE, GetLlmResponseActivity, GetLlmResponseInput};
pub use infer_entities::{INFER_ENTITIES, InferEntitiesActivity};

use hash_ai_core::provider::Usage;
use hash_ai_inference::DriverError;
use hash_ai_providers::ProviderRouter;
use hash_ai_telemetry::UsageReporter;
use serde_json::{Map, Value};
use tracing::warn;

use crate::activity::{ActivityContext, ActivityError};

impl From<DriverError> for ActivityError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Cancelled => Self::Cancelled,
            DriverError::Fatal(fatal) => Self::Failed(fatal.to_string()),
        }
    }
}

/// Record usage for a successful dialog. Recorder failures are logged only.
async fn record_usage(
    reporter: Option<&UsageReporter>,
    router: &ProviderRouter,
    activity: &str,
    ctx: &ActivityContext,
    model: &str,
    usage: Usage,
    retry_count: u32,
) {
    let Some(reporter) = reporter else {
        return;
    };

    let service = router
        .models()
        .get(model)
        .map(|spec| spec.family.as_str())
        .unwrap_or("unknown");

    let mut metadata = Map::new();
    metadata.insert("activity".into(), Value::from(activity));
    metadata.insert("taskId".into(), Value::from(ctx.task_id.as_str()));
    metadata.insert("retryCount".into(), Value::from(retry_count));

    if let Err(e) = reporter.report(service, model, usage, metadata).await {
        warn!(task_id = %ctx.task_id, model, error = %e, "Failed to record usage");
    }
}
