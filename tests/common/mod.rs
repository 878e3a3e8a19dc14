//! In-memory ports shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use vellum::application::jobs::{RenderTaskRequest, TaskQueue};
use vellum::application::renders::{RenderService, RenderServiceConfig};
use vellum::application::repos::{
    ClaimRenderParams, RenderClaim, RenderQueryFilter, RendersRepo, RepoError,
    UpdateRenderStateParams,
};
use vellum::domain::renders::{OutputLayout, RenderRecord, SourceRef, SourceTemplates};
use vellum::domain::tasks::TaskReport;

struct StoredRender {
    record: RenderRecord,
    claimed_at: Instant,
}

#[derive(Default)]
pub struct InMemoryRenders {
    renders: Mutex<Vec<StoredRender>>,
}

impl InMemoryRenders {
    pub async fn all(&self) -> Vec<RenderRecord> {
        self.renders
            .lock()
            .await
            .iter()
            .map(|stored| stored.record.clone())
            .collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<RenderRecord> {
        self.renders
            .lock()
            .await
            .iter()
            .find(|stored| stored.record.id == id)
            .map(|stored| stored.record.clone())
    }

    fn latest_index(renders: &[StoredRender], source: &SourceRef) -> Option<usize> {
        renders
            .iter()
            .enumerate()
            .filter(|(_, stored)| {
                stored.record.source_type == source.source_type
                    && stored.record.source_id == source.source_id
            })
            .max_by_key(|(_, stored)| (stored.record.created_at, stored.record.id))
            .map(|(index, _)| index)
    }
}

#[async_trait]
impl RendersRepo for InMemoryRenders {
    async fn claim_render(&self, params: ClaimRenderParams) -> Result<RenderClaim, RepoError> {
        let mut renders = self.renders.lock().await;
        match Self::latest_index(&renders, &params.source) {
            None => {
                let record = RenderRecord::new(params.source);
                renders.push(StoredRender {
                    record: record.clone(),
                    claimed_at: Instant::now(),
                });
                Ok(RenderClaim::Created(record))
            }
            Some(index) => {
                let stored = &mut renders[index];
                if stored.record.task_id.is_none()
                    && stored.claimed_at.elapsed() >= params.stale_after
                {
                    stored.claimed_at = Instant::now();
                    Ok(RenderClaim::Reclaimed(stored.record.clone()))
                } else {
                    Ok(RenderClaim::Existing(stored.record.clone()))
                }
            }
        }
    }

    async fn find_render(&self, id: Uuid) -> Result<Option<RenderRecord>, RepoError> {
        Ok(self.get(id).await)
    }

    async fn find_latest_render(
        &self,
        source: &SourceRef,
    ) -> Result<Option<RenderRecord>, RepoError> {
        let renders = self.renders.lock().await;
        Ok(Self::latest_index(&renders, source).map(|index| renders[index].record.clone()))
    }

    async fn assign_task_id(&self, id: Uuid, task_id: &str) -> Result<bool, RepoError> {
        let mut renders = self.renders.lock().await;
        let stored = renders
            .iter_mut()
            .find(|stored| stored.record.id == id)
            .ok_or(RepoError::NotFound)?;
        if stored.record.task_id.is_some() {
            return Ok(false);
        }
        stored.record.task_id = Some(task_id.to_string());
        Ok(true)
    }

    async fn update_render_state(&self, params: UpdateRenderStateParams) -> Result<(), RepoError> {
        let mut renders = self.renders.lock().await;
        let stored = renders
            .iter_mut()
            .find(|stored| stored.record.id == params.id)
            .ok_or(RepoError::NotFound)?;
        stored.record.state = params.state;
        stored.record.logs = params.logs;
        Ok(())
    }

    async fn list_renders(
        &self,
        filter: &RenderQueryFilter,
        limit: u32,
    ) -> Result<Vec<RenderRecord>, RepoError> {
        let mut records: Vec<_> = self
            .renders
            .lock()
            .await
            .iter()
            .map(|stored| stored.record.clone())
            .filter(|record| filter.state.is_none_or(|state| record.state == state))
            .filter(|record| {
                filter
                    .source_type
                    .is_none_or(|source_type| record.source_type == source_type)
            })
            .collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        records.truncate(limit as usize);
        Ok(records)
    }
}

/// Queue whose reports are set by the test.
#[derive(Default)]
pub struct ScriptedQueue {
    submissions: Mutex<Vec<(String, RenderTaskRequest)>>,
    reports: Mutex<HashMap<String, TaskReport>>,
    status_calls: AtomicUsize,
    fail_next_submit: AtomicBool,
}

impl ScriptedQueue {
    pub async fn submissions(&self) -> Vec<(String, RenderTaskRequest)> {
        self.submissions.lock().await.clone()
    }

    pub async fn report(&self, task_id: &str, report: TaskReport) {
        self.reports.lock().await.insert(task_id.to_string(), report);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskQueue for ScriptedQueue {
    async fn submit(&self, request: RenderTaskRequest) -> Result<String, RepoError> {
        if self.fail_next_submit.swap(false, Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let mut submissions = self.submissions.lock().await;
        let task_id = format!("task-{}", submissions.len() + 1);
        submissions.push((task_id.clone(), request));
        Ok(task_id)
    }

    async fn status(&self, task_id: &str) -> Result<TaskReport, RepoError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .reports
            .lock()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or(TaskReport::Pending))
    }
}

pub struct Harness {
    pub renders: Arc<InMemoryRenders>,
    pub queue: Arc<ScriptedQueue>,
    pub service: Arc<RenderService>,
}

pub fn local_layout() -> OutputLayout {
    OutputLayout::local("/srv/media", "/media/")
}

pub fn harness_with_lease(claim_lease: Duration) -> Harness {
    let renders = Arc::new(InMemoryRenders::default());
    let queue = Arc::new(ScriptedQueue::default());
    let service = Arc::new(RenderService::new(
        renders.clone(),
        queue.clone(),
        RenderServiceConfig {
            sources: SourceTemplates::default(),
            layout: local_layout(),
            claim_lease,
        },
    ));
    Harness {
        renders,
        queue,
        service,
    }
}

pub fn harness() -> Harness {
    harness_with_lease(Duration::from_secs(300))
}
