//! Repository traits describing persistence adapters.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::renders::{RenderRecord, SourceRef};
use crate::domain::tasks::RenderResult;
use crate::domain::types::{RenderState, SourceType};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ClaimRenderParams {
    pub source: SourceRef,
    /// Unsubmitted claims older than this are handed out again.
    pub stale_after: Duration,
}

/// Result of the per-document find-or-create step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderClaim {
    /// No record existed; this caller created it and must submit it.
    Created(RenderRecord),
    /// An unsubmitted record outlived its claim lease; this caller must submit it.
    Reclaimed(RenderRecord),
    /// The latest record, owned by someone else.
    Existing(RenderRecord),
}

#[derive(Debug, Clone)]
pub struct UpdateRenderStateParams {
    pub id: Uuid,
    pub state: RenderState,
    pub logs: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderQueryFilter {
    pub state: Option<RenderState>,
    pub source_type: Option<SourceType>,
}

#[async_trait]
pub trait RendersRepo: Send + Sync {
    /// Atomically find the latest record for a document or create one.
    async fn claim_render(&self, params: ClaimRenderParams) -> Result<RenderClaim, RepoError>;

    async fn find_render(&self, id: Uuid) -> Result<Option<RenderRecord>, RepoError>;

    async fn find_latest_render(&self, source: &SourceRef)
    -> Result<Option<RenderRecord>, RepoError>;

    /// Set `task_id` if it is still unset. Returns `false` when another writer got there first.
    async fn assign_task_id(&self, id: Uuid, task_id: &str) -> Result<bool, RepoError>;

    /// Write `state` and `logs` only.
    async fn update_render_state(&self, params: UpdateRenderStateParams) -> Result<(), RepoError>;

    async fn list_renders(
        &self,
        filter: &RenderQueryFilter,
        limit: u32,
    ) -> Result<Vec<RenderRecord>, RepoError>;
}

#[async_trait]
pub trait TaskResultsRepo: Send + Sync {
    async fn store_result(&self, result_key: Uuid, result: &RenderResult)
    -> Result<(), RepoError>;
}
