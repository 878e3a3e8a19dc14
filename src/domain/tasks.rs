//! What the task queue can tell us about a submitted render.

use serde::{Deserialize, Serialize};

use super::types::RenderState;

/// Exit status and captured output of one renderer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResult {
    pub exit_code: i32,
    pub logs: String,
}

impl RenderResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Terminal report for a task. The queue running a task to completion says nothing
/// about whether the render itself worked; that lives in the [`RenderResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    QueueFailed(String),
    QueueSucceeded(RenderResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Pending,
    Started,
    Retry,
    Finished(TaskOutcome),
}

impl TaskReport {
    pub fn render_state(&self) -> RenderState {
        match self {
            TaskReport::Pending => RenderState::Pending,
            TaskReport::Started => RenderState::Started,
            TaskReport::Retry => RenderState::Retry,
            TaskReport::Finished(TaskOutcome::QueueSucceeded(result)) if result.succeeded() => {
                RenderState::Success
            }
            TaskReport::Finished(_) => RenderState::Failure,
        }
    }

    /// Logs carried by the report; only a queue-level success carries any.
    pub fn logs(&self) -> Option<&str> {
        match self {
            TaskReport::Finished(TaskOutcome::QueueSucceeded(result)) => Some(&result.logs),
            _ => None,
        }
    }
}
