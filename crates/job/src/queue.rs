use crate::JobPayload;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A job as handed to the external task queue: a task name and an opaque
/// body the worker will receive unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub name: String,
    pub body: String,
}

/// Transport to an external, durable task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, task: QueuedTask) -> Result<()>;
}

/// Serialize `payload` and submit it under its operation's task name.
pub async fn submit(queue: &dyn TaskQueue, payload: &JobPayload) -> Result<()> {
    let task = QueuedTask { name: payload.task_name().to_string(), body: payload.to_json()? };
    queue.submit(task).await?;
    tracing::info!(job = %payload.id, task = payload.task_name(), "Submitted job");
    Ok(())
}
