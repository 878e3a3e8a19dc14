use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{application::repos::RepoError, domain::tasks::TaskReport};

/// What a render task needs to run, as handed to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTaskRequest {
    pub source_location: String,
    pub output_location: String,
}

/// The asynchronous execution backend: fire on submit, poll on read.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a render, returning the task handle.
    async fn submit(&self, request: RenderTaskRequest) -> Result<String, RepoError>;

    /// Current report for a task handle. Unknown handles report [`TaskReport::Pending`].
    async fn status(&self, task_id: &str) -> Result<TaskReport, RepoError>;
}
