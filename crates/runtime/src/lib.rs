//! # HASH AI Runtime
//!
//! Hosts the worker's activities. A [`Worker`] receives [`WorkerCommand`]s
//! over a channel, runs the named [`Activity`] under a concurrency limit, and
//! answers every task with exactly one [`TaskResult`]. The [`stdio`] module
//! lets a host process drive the worker with JSON lines.

pub mod activities;
pub mod activity;
pub mod probe;
pub mod stdio;
pub mod worker;

use std::sync::Arc;

use hash_ai_inference::{DialogDriver, EntityInference};
use hash_ai_telemetry::UsageReporter;

pub use activities::{
    GET_LLM_RESPONSE, GetLlmResponseActivity, INFER_ENTITIES, InferEntitiesActivity,
};
pub use activity::{Activity, ActivityContext, ActivityError, ActivityRegistry};
pub use probe::{DEFAULT_PROBE_TIMEOUT, probe_broker};
pub use worker::{ActivityTask, TaskOutcome, TaskResult, Worker, WorkerCommand};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },
}

/// The registry with every activity this worker serves.
pub fn default_registry(
    driver: Arc<DialogDriver>,
    usage: Option<Arc<UsageReporter>>,
) -> ActivityRegistry {
    let mut llm = GetLlmResponseActivity::new(Arc::clone(&driver));
    let mut infer = InferEntitiesActivity::new(EntityInference::new(driver));
    if let Some(reporter) = usage {
        llm = llm.with_usage_reporter(Arc::clone(&reporter));
        infer = infer.with_usage_reporter(reporter);
    }

    ActivityRegistry::new()
        .with_activity(Arc::new(llm))
        .with_activity(Arc::new(infer))
}
