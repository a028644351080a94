//! The activity abstraction and the name → activity registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why an activity did not produce output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActivityError {
    #[error("Activity not found: {0}")]
    NotFound(String),

    #[error("Invalid activity input: {0}")]
    InvalidInput(String),

    #[error("Activity failed: {0}")]
    Failed(String),

    #[error("Activity was cancelled")]
    Cancelled,
}

impl ActivityError {
    /// Stable kind string used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::InvalidInput(_) => "invalid-input",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-execution context handed to an activity.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub task_id: String,
    pub cancel: CancellationToken,
}

impl ActivityContext {
    pub fn new(task_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            task_id: task_id.into(),
            cancel,
        }
    }
}

/// A unit of work the host workflow can schedule on this worker.
#[async_trait]
pub trait Activity: Send + Sync {
    /// The name the host schedules this activity under.
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

#[derive(Default, Clone)]
pub struct ActivityRegistry {
    activities: BTreeMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity, replacing any previous one with the same name.
    pub fn register(&mut self, activity: Arc<dyn Activity>) {
        self.activities.insert(activity.name().to_string(), activity);
    }

    pub fn with_activity(mut self, activity: Arc<dyn Activity>) -> Self {
        self.register(activity);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.activities.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
