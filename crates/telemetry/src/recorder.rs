//! Usage recorders.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use hash_ai_config::TelemetryConfig;
use hash_ai_core::provider::Usage;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::TelemetryError;
use crate::pricing::PricingTable;
use crate::record::UsageRecord;

/// Sink for usage records.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<(), TelemetryError>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryUsageRecorder {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Input and output units summed over every record.
    pub fn totals(&self) -> (u64, u64) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .fold((0, 0), |(input, output), r| {
                (input + u64::from(r.input_unit_count), output + u64::from(r.output_unit_count))
            })
    }
}

#[async_trait]
impl UsageRecorder for InMemoryUsageRecorder {
    async fn record(&self, record: UsageRecord) -> Result<(), TelemetryError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
        Ok(())
    }
}

/// Emits each record as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageRecorder;

#[async_trait]
impl UsageRecorder for TracingUsageRecorder {
    async fn record(&self, record: UsageRecord) -> Result<(), TelemetryError> {
        let metadata = serde_json::to_string(&record.custom_metadata)?;
        info!(
            id = %record.id,
            service_name = %record.service_name,
            feature_name = %record.feature_name,
            input_unit_count = record.input_unit_count,
            output_unit_count = record.output_unit_count,
            cost_usd = record.cost_usd,
            custom_metadata = %metadata,
            "Usage recorded"
        );
        Ok(())
    }
}

/// Prices usage and hands records to a recorder.
pub struct UsageReporter {
    pricing: Arc<PricingTable>,
    recorder: Arc<dyn UsageRecorder>,
    enabled: bool,
}

impl UsageReporter {
    pub fn new(pricing: Arc<PricingTable>, recorder: Arc<dyn UsageRecorder>) -> Self {
        Self {
            pricing,
            recorder,
            enabled: true,
        }
    }

    pub fn from_config(config: &TelemetryConfig, recorder: Arc<dyn UsageRecorder>) -> Self {
        Self {
            pricing: Arc::new(PricingTable::from_config(config)),
            recorder,
            enabled: config.enabled,
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record one interaction. Returns the record, or `None` when disabled.
    pub async fn report(
        &self,
        service_name: &str,
        model: &str,
        usage: Usage,
        metadata: Map<String, Value>,
    ) -> Result<Option<UsageRecord>, TelemetryError> {
        if !self.enabled {
            debug!(model, "Usage reporting disabled");
            return Ok(None);
        }

        let cost = self.pricing.compute_cost(model, usage.input_tokens, usage.output_tokens);
        let mut record = UsageRecord::new(service_name, model, usage).with_cost(cost);
        record.custom_metadata = metadata;

        self.recorder.record(record.clone()).await?;
        Ok(Some(record))
    }
}
