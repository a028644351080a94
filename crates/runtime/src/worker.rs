//! The worker loop: receives activity tasks, runs them concurrently, and
//! emits one result per task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityContext, ActivityError, ActivityRegistry};

/// A request to run one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTask {
    pub task_id: String,
    pub activity: String,
    #[serde(default)]
    pub input: Value,
}

/// Commands the host sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerCommand {
    Run(ActivityTask),
    Cancel { task_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TaskOutcome {
    Completed { output: Value },
    Failed { kind: String, message: String },
    Cancelled,
}

impl From<Result<Value, ActivityError>> for TaskOutcome {
    fn from(result: Result<Value, ActivityError>) -> Self {
        match result {
            Ok(output) => Self::Completed { output },
            Err(ActivityError::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

type Running = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Runs activities from a command channel under a concurrency limit.
pub struct Worker {
    registry: Arc<ActivityRegistry>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    running: Running,
}

impl Worker {
    pub fn new(registry: ActivityRegistry, max_concurrent_activities: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            permits: Arc::new(Semaphore::new(max_concurrent_activities.max(1))),
            shutdown: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cancelling this token stops the loop and cancels every running task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Consume commands until the channel closes or shutdown is requested,
    /// then wait for in-flight tasks to report.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        results: mpsc::Sender<TaskResult>,
    ) {
        info!(activities = ?self.registry.names(), "Worker started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("Worker shutting down");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Activity task panicked");
                    }
                }
                command = commands.recv() => match command {
                    Some(WorkerCommand::Run(task)) => self.spawn(&mut tasks, task, &results).await,
                    Some(WorkerCommand::Cancel { task_id }) => self.cancel(&task_id),
                    None => {
                        debug!("Command channel closed");
                        break;
                    }
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Activity task panicked");
            }
        }
        info!("Worker stopped");
    }

    fn cancel(&self, task_id: &str) {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned();
        match token {
            Some(token) => {
                info!(task_id, "Cancelling activity");
                token.cancel();
            }
            None => warn!(task_id, "Cancel requested for unknown task"),
        }
    }

    async fn spawn(
        &self,
        tasks: &mut JoinSet<()>,
        task: ActivityTask,
        results: &mpsc::Sender<TaskResult>,
    ) {
        let token = self.shutdown.child_token();
        let duplicate = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if running.contains_key(&task.task_id) {
                true
            } else {
                running.insert(task.task_id.clone(), token.clone());
                false
            }
        };
        if duplicate {
            warn!(task_id = %task.task_id, "Rejecting duplicate task id");
            let result = TaskResult {
                task_id: task.task_id.clone(),
                outcome: TaskOutcome::Failed {
                    kind: "duplicate-task".into(),
                    message: format!("Task {} is already running", task.task_id),
                },
            };
            if results.send(result).await.is_err() {
                warn!("Result channel closed");
            }
            return;
        }

        let registry = Arc::clone(&self.registry);
        let permits = Arc::clone(&self.permits);
        let running = Arc::clone(&self.running);
        let results = results.clone();

        tasks.spawn(async move {
            let ctx = ActivityContext::new(task.task_id.clone(), token);
            let outcome = execute(&registry, &permits, &ctx, task.activity, task.input).await;

            running.lock().unwrap_or_else(PoisonError::into_inner).remove(&ctx.task_id);

            let result = TaskResult {
                task_id: ctx.task_id,
                outcome: outcome.into(),
            };
            if results.send(result).await.is_err() {
                warn!("Result channel closed");
            }
        });
    }
}

async fn execute(
    registry: &ActivityRegistry,
    permits: &Semaphore,
    ctx: &ActivityContext,
    name: String,
    input: Value,
) -> Result<Value, ActivityError> {
    let activity = registry.get(&name).ok_or(ActivityError::NotFound(name))?;

    let _permit = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => return Err(ActivityError::Cancelled),
        permit = permits.acquire() => permit.map_err(|e| ActivityError::Failed(e.to_string()))?,
    };

    info!(task_id = %ctx.task_id, activity = activity.name(), "Activity started");
    let result = activity.execute(ctx, input).await;
    match &result {
        Ok(_) => info!(task_id = %ctx.task_id, activity = activity.name(), "Activity completed"),
        Err(e) => {
            warn!(task_id = %ctx.task_id, activity = activity.name(), error = %e, "Activity failed")
        }
    }
    result
}
