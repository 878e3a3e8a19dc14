//! Render lookup and dispatch: find-or-create-and-start plus refresh-on-read.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::jobs::{RenderTaskRequest, TaskQueue};
use crate::application::repos::{
    ClaimRenderParams, RenderClaim, RenderQueryFilter, RendersRepo, RepoError,
    UpdateRenderStateParams,
};
use crate::domain::error::DomainError;
use crate::domain::renders::{OutputLayout, RenderRecord, SourceRef, SourceTemplates};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown source type `{0}`")]
    UnknownSourceType(String),
    #[error("render `{0}` has already been started")]
    AlreadyStarted(Uuid),
    #[error("render not found")]
    NotFound,
    #[error("invalid render request: {0}")]
    Validation(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<DomainError> for RenderError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnknownSourceType { value } => RenderError::UnknownSourceType(value),
            DomainError::Validation { message } => RenderError::Validation(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderServiceConfig {
    pub sources: SourceTemplates,
    pub layout: OutputLayout,
    pub claim_lease: Duration,
}

#[derive(Clone)]
pub struct RenderService {
    repo: Arc<dyn RendersRepo>,
    queue: Arc<dyn TaskQueue>,
    sources: SourceTemplates,
    layout: OutputLayout,
    claim_lease: Duration,
}

impl RenderService {
    pub fn new(
        repo: Arc<dyn RendersRepo>,
        queue: Arc<dyn TaskQueue>,
        config: RenderServiceConfig,
    ) -> Self {
        Self {
            repo,
            queue,
            sources: config.sources,
            layout: config.layout,
            claim_lease: config.claim_lease,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn output_url(&self, record: &RenderRecord) -> Option<String> {
        record.output_url(&self.layout)
    }

    /// Hand a record to the task queue. At most one task is ever attached to a record.
    pub async fn submit(&self, record: &mut RenderRecord) -> Result<(), RenderError> {
        if record.is_submitted() {
            return Err(RenderError::AlreadyStarted(record.id));
        }

        let source_location = record.resolve_source_location(&self.sources)?;
        let output_location = record.resolve_output_location(&self.layout);

        let task_id = self
            .queue
            .submit(RenderTaskRequest {
                source_location: source_location.to_string(),
                output_location: output_location.clone(),
            })
            .await?;

        if !self.repo.assign_task_id(record.id, &task_id).await? {
            warn!(
                target = "application::renders::submit",
                render_id = %record.id,
                task_id = %task_id,
                "render already carries a task; discarding new task handle"
            );
            return Err(RenderError::AlreadyStarted(record.id));
        }

        info!(
            target = "application::renders::submit",
            render_id = %record.id,
            task_id = %task_id,
            source = %source_location,
            output = %output_location,
            "render submitted"
        );
        record.task_id = Some(task_id);
        Ok(())
    }

    /// Re-derive `state` and `logs` from the queue's current report.
    pub async fn refresh_state(&self, record: &mut RenderRecord) -> Result<(), RenderError> {
        let Some(task_id) = record.task_id.as_deref() else {
            return Ok(());
        };

        let report = self.queue.status(task_id).await?;
        record.apply_report(&report);

        self.repo
            .update_render_state(UpdateRenderStateParams {
                id: record.id,
                state: record.state,
                logs: record.logs.clone(),
            })
            .await?;

        counter!("vellum_render_refresh_total", "state" => record.state.as_str()).increment(1);
        debug!(
            target = "application::renders::refresh_state",
            render_id = %record.id,
            state = %record.state,
            "render state refreshed"
        );
        Ok(())
    }

    /// Parse raw caller input, then [`Self::get_or_create_and_start`].
    pub async fn dispatch(
        &self,
        source_type: &str,
        source_id: &str,
    ) -> Result<(RenderRecord, bool), RenderError> {
        let source = SourceRef::parse(source_type, source_id)?;
        self.get_or_create_and_start(source).await
    }

    /// Return the latest render for `source`, creating and submitting one if none exists.
    /// The flag is `true` only when a new record was created.
    pub async fn get_or_create_and_start(
        &self,
        source: SourceRef,
    ) -> Result<(RenderRecord, bool), RenderError> {
        let claim = self
            .repo
            .claim_render(ClaimRenderParams {
                source,
                stale_after: self.claim_lease,
            })
            .await?;

        match claim {
            RenderClaim::Created(mut record) => {
                self.submit(&mut record).await?;
                counter!("vellum_renders_created_total").increment(1);
                Ok((record, true))
            }
            RenderClaim::Reclaimed(mut record) => {
                info!(
                    target = "application::renders::get_or_create_and_start",
                    render_id = %record.id,
                    "resubmitting render whose claim went stale"
                );
                self.submit(&mut record).await?;
                Ok((record, false))
            }
            RenderClaim::Existing(mut record) => {
                self.refresh_state(&mut record).await?;
                Ok((record, false))
            }
        }
    }

    /// Load a render by id, refreshed from the queue.
    pub async fn load(&self, id: Uuid) -> Result<RenderRecord, RenderError> {
        let mut record = self
            .repo
            .find_render(id)
            .await?
            .ok_or(RenderError::NotFound)?;
        self.refresh_state(&mut record).await?;
        Ok(record)
    }

    /// Latest render for a document without creating one.
    pub async fn latest(&self, source: &SourceRef) -> Result<RenderRecord, RenderError> {
        let mut record = self
            .repo
            .find_latest_render(source)
            .await?
            .ok_or(RenderError::NotFound)?;
        self.refresh_state(&mut record).await?;
        Ok(record)
    }

    pub async fn list(
        &self,
        filter: &RenderQueryFilter,
        limit: u32,
    ) -> Result<Vec<RenderRecord>, RenderError> {
        let limit = limit.clamp(1, 200);
        Ok(self.repo.list_renders(filter, limit).await?)
    }
}
