//! Usage records written for every completed LLM dialog.

use chrono::{DateTime, Utc};
use hash_ai_core::provider::Usage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One billable LLM interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    /// The provider that served the request (`openai`, `anthropic`).
    pub service_name: String,
    /// The model used.
    pub feature_name: String,
    pub input_unit_count: u32,
    pub output_unit_count: u32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_metadata: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl UsageRecord {
    pub fn new(
        service_name: impl Into<String>,
        feature_name: impl Into<String>,
        usage: Usage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_name: service_name.into(),
            feature_name: feature_name.into(),
            input_unit_count: usage.input_tokens,
            output_unit_count: usage.output_tokens,
            custom_metadata: Map::new(),
            recorded_at: Utc::now(),
            cost_usd: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom_metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cost(mut self, cost_usd: Option<f64>) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn total_units(&self) -> u64 {
        u64::from(self.input_unit_count) + u64::from(self.output_unit_count)
    }
}
