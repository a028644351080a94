//! Usage accounting for LLM calls.
//!
//! Every completed dialog produces a [`UsageRecord`], priced with the
//! [`PricingTable`] and handed to a [`UsageRecorder`].

pub mod pricing;
pub mod record;
pub mod recorder;

pub use pricing::{ModelPricing, PricingTable};
pub use record::UsageRecord;
pub use recorder::{InMemoryUsageRecorder, TracingUsageRecorder, UsageRecorder, UsageReporter};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
