use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::jobs::{RENDER_JOB_TYPE, RenderJobPayload, RenderTaskRequest, TaskQueue};
use crate::application::repos::{RepoError, TaskResultsRepo};
use crate::domain::tasks::{RenderResult, TaskOutcome, TaskReport};

use super::{PostgresRepositories, map_sqlx_error};

/// Render task queue backed by apalis' Postgres job table.
#[derive(Clone)]
pub struct PostgresTaskQueue {
    repositories: PostgresRepositories,
    max_attempts: i32,
}

impl PostgresTaskQueue {
    pub fn new(repositories: PostgresRepositories, max_attempts: u32) -> Self {
        Self {
            repositories,
            max_attempts: i32::try_from(max_attempts).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Debug, FromRow)]
struct TaskStatusRow {
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    exit_code: Option<i32>,
    result_logs: Option<String>,
}

fn report_from_row(row: TaskStatusRow) -> Result<TaskReport, RepoError> {
    let report = match row.status.as_str() {
        "Pending" | "Scheduled" | "Latest" if row.attempts > 0 => TaskReport::Retry,
        "Pending" | "Scheduled" | "Latest" => TaskReport::Pending,
        "Running" => TaskReport::Started,
        "Failed" if row.attempts < row.max_attempts => TaskReport::Retry,
        "Failed" | "Killed" => TaskReport::Finished(TaskOutcome::QueueFailed(
            row.last_error
                .unwrap_or_else(|| format!("task {}", row.status.to_lowercase())),
        )),
        "Done" => match row.exit_code {
            Some(exit_code) => TaskReport::Finished(TaskOutcome::QueueSucceeded(RenderResult {
                exit_code,
                logs: row.result_logs.unwrap_or_default(),
            })),
            None => TaskReport::Finished(TaskOutcome::QueueFailed(
                "task finished without a render result".to_string(),
            )),
        },
        other => {
            return Err(RepoError::from_persistence(format!(
                "unknown job state `{other}`"
            )));
        }
    };
    Ok(report)
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn submit(&self, request: RenderTaskRequest) -> Result<String, RepoError> {
        let payload = RenderJobPayload {
            result_key: Uuid::new_v4(),
            source_location: request.source_location,
            output_location: request.output_location,
        };
        let job = serde_json::to_value(&payload).map_err(RepoError::from_persistence)?;

        let (id,): (String,) = sqlx::query_as(
            "SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id",
        )
        .bind(RENDER_JOB_TYPE)
        .bind(job)
        .bind("Pending")
        .bind(OffsetDateTime::now_utc())
        .bind(self.max_attempts)
        .bind(0_i32)
        .fetch_one(self.repositories.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn status(&self, task_id: &str) -> Result<TaskReport, RepoError> {
        let row = sqlx::query_as::<_, TaskStatusRow>(
            "SELECT j.status, j.attempts, j.max_attempts, j.last_error, \
                    r.exit_code, r.logs AS result_logs \
             FROM apalis.jobs j \
             LEFT JOIN render_task_results r \
               ON r.result_key = (j.job ->> 'result_key')::uuid \
             WHERE j.id = $1",
        )
        .bind(task_id)
        .fetch_optional(self.repositories.pool())
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => report_from_row(row),
            None => {
                warn!(
                    target = "vellum::infra::db::tasks",
                    task_id,
                    "queue has no record of task; reporting it as pending"
                );
                Ok(TaskReport::Pending)
            }
        }
    }
}

#[async_trait]
impl TaskResultsRepo for PostgresRepositories {
    async fn store_result(
        &self,
        result_key: Uuid,
        result: &RenderResult,
    ) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO render_task_results (result_key, exit_code, logs, finished_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (result_key) DO UPDATE \
             SET exit_code = EXCLUDED.exit_code, \
                 logs = EXCLUDED.logs, \
                 finished_at = EXCLUDED.finished_at",
        )
        .bind(result_key)
        .bind(result.exit_code)
        .bind(&result.logs)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, attempts: i32) -> TaskStatusRow {
        TaskStatusRow {
            status: status.to_string(),
            attempts,
            max_attempts: 3,
            last_error: None,
            exit_code: None,
            result_logs: None,
        }
    }

    #[test]
    fn queued_tasks_are_pending_until_they_have_been_attempted() {
        assert_eq!(report_from_row(row("Pending", 0)).unwrap(), TaskReport::Pending);
        assert_eq!(report_from_row(row("Pending", 1)).unwrap(), TaskReport::Retry);
        assert_eq!(report_from_row(row("Running", 1)).unwrap(), TaskReport::Started);
    }

    #[test]
    fn failures_retry_until_attempts_are_exhausted() {
        assert_eq!(report_from_row(row("Failed", 1)).unwrap(), TaskReport::Retry);

        let mut exhausted = row("Failed", 3);
        exhausted.last_error = Some("docker unreachable".into());
        assert_eq!(
            report_from_row(exhausted).unwrap(),
            TaskReport::Finished(TaskOutcome::QueueFailed("docker unreachable".into()))
        );

        assert!(matches!(
            report_from_row(row("Killed", 1)).unwrap(),
            TaskReport::Finished(TaskOutcome::QueueFailed(_))
        ));
    }

    #[test]
    fn completed_tasks_carry_the_stored_result() {
        let mut done = row("Done", 1);
        done.exit_code = Some(1);
        done.result_logs = Some("latexmk failed".into());
        assert_eq!(
            report_from_row(done).unwrap(),
            TaskReport::Finished(TaskOutcome::QueueSucceeded(RenderResult {
                exit_code: 1,
                logs: "latexmk failed".into(),
            }))
        );

        assert!(matches!(
            report_from_row(row("Done", 1)).unwrap(),
            TaskReport::Finished(TaskOutcome::QueueFailed(_))
        ));
    }

    #[test]
    fn unknown_job_states_are_persistence_errors() {
        assert!(matches!(
            report_from_row(row("Exploded", 0)),
            Err(RepoError::Persistence(_))
        ));
    }
}
