use std::time::Instant;

use apalis::prelude::{Data, Error as ApalisError};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::context::{RenderWorkerContext, job_failed};

/// Queue namespace for render tasks.
pub const RENDER_JOB_TYPE: &str = "render_document";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJobPayload {
    /// Key under which the worker stores the executor result.
    pub result_key: Uuid,
    pub source_location: String,
    pub output_location: String,
}

/// Run the renderer for one queued task and record its result.
///
/// A renderer that exits nonzero still completes the task: the exit code travels in
/// the stored result. Only backend failures fail the task and fall to the queue's
/// retry policy.
pub async fn process_render_job(
    payload: RenderJobPayload,
    context: Data<RenderWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let started_at = Instant::now();

    let outcome = ctx
        .executor
        .execute(
            &payload.source_location,
            &payload.output_location,
            &ctx.profile,
        )
        .await;
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            counter!("vellum_render_jobs_total", "outcome" => "error").increment(1);
            warn!(
                target = "application::jobs::process_render_job",
                result_key = %payload.result_key,
                source = %payload.source_location,
                profile = ctx.profile.label(),
                elapsed_ms,
                error = %err,
                "render execution failed"
            );
            return Err(job_failed(err));
        }
    };

    ctx.results
        .store_result(payload.result_key, &result)
        .await
        .map_err(job_failed)?;

    let outcome = if result.succeeded() {
        "success"
    } else {
        "failure"
    };
    counter!("vellum_render_jobs_total", "outcome" => outcome).increment(1);
    histogram!("vellum_render_job_ms").record(elapsed_ms as f64);

    info!(
        target = "application::jobs::process_render_job",
        result_key = %payload.result_key,
        source = %payload.source_location,
        output = %payload.output_location,
        exit_code = result.exit_code,
        elapsed_ms,
        "render finished"
    );

    Ok(())
}
