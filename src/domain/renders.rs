//! Render records and the rules for locating their inputs and outputs.

use std::path::PathBuf;

use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use super::{
    error::DomainError,
    tasks::TaskReport,
    types::{RenderState, SourceType},
};

pub const OUTPUT_PREFIX: &str = "render-output";
pub const ENTRY_POINT: &str = "index.html";
pub const SOURCE_ID_MAX_LEN: usize = 50;
pub const SOURCE_ID_PLACEHOLDER: &str = "{source_id}";
pub const DEFAULT_ARXIV_URL_FORMAT: &str = "https://arxiv.org/src/{source_id}";
pub const DEFAULT_SUBMISSION_URL_FORMAT: &str =
    "http://fm-service-endpoint/upload/{source_id}/content";

/// A document reference as supplied by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub source_type: SourceType,
    pub source_id: String,
}

impl SourceRef {
    pub fn new(source_type: SourceType, source_id: impl Into<String>) -> Result<Self, DomainError> {
        let source_id = source_id.into();
        let trimmed = source_id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("source_id must not be empty"));
        }
        if trimmed.chars().count() > SOURCE_ID_MAX_LEN {
            return Err(DomainError::validation(format!(
                "source_id must be at most {SOURCE_ID_MAX_LEN} characters"
            )));
        }

        Ok(Self {
            source_type,
            source_id: trimmed.to_string(),
        })
    }

    /// Parse raw caller input; an unrecognised type is rejected before anything else.
    pub fn parse(source_type: &str, source_id: &str) -> Result<Self, DomainError> {
        let source_type = source_type.trim().parse::<SourceType>()?;
        Self::new(source_type, source_id)
    }
}

/// URL templates used to turn a [`SourceRef`] into a fetchable location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTemplates {
    arxiv: String,
    submission: String,
}

impl SourceTemplates {
    pub fn new(arxiv: impl Into<String>, submission: impl Into<String>) -> Self {
        Self {
            arxiv: arxiv.into(),
            submission: submission.into(),
        }
    }

    fn template(&self, source_type: SourceType) -> &str {
        match source_type {
            SourceType::Arxiv => &self.arxiv,
            SourceType::Submission => &self.submission,
        }
    }

    pub fn resolve(&self, source_type: SourceType, source_id: &str) -> Result<Url, DomainError> {
        let candidate = self
            .template(source_type)
            .replace(SOURCE_ID_PLACEHOLDER, source_id);
        Url::parse(&candidate).map_err(|err| {
            DomainError::validation(format!(
                "source location `{candidate}` for {source_type} is not a valid URL: {err}"
            ))
        })
    }
}

impl Default for SourceTemplates {
    fn default() -> Self {
        Self::new(DEFAULT_ARXIV_URL_FORMAT, DEFAULT_SUBMISSION_URL_FORMAT)
    }
}

/// Where render output lands and how it is reached from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    media_root: Option<PathBuf>,
    media_url: String,
}

impl OutputLayout {
    /// Output written below a local directory.
    pub fn local(media_root: impl Into<PathBuf>, media_url: impl Into<String>) -> Self {
        Self {
            media_root: Some(media_root.into()),
            media_url: media_url.into(),
        }
    }

    /// Output written relative to a bucket.
    pub fn remote(media_url: impl Into<String>) -> Self {
        Self {
            media_root: None,
            media_url: media_url.into(),
        }
    }

    pub fn media_root(&self) -> Option<&PathBuf> {
        self.media_root.as_ref()
    }

    pub fn output_location(&self, id: Uuid) -> String {
        let relative = PathBuf::from(OUTPUT_PREFIX).join(id.to_string());
        match self.media_root.as_ref() {
            Some(root) => root.join(relative).display().to_string(),
            None => relative.display().to_string(),
        }
    }

    pub fn output_url(&self, id: Uuid) -> String {
        format!(
            "{}/{OUTPUT_PREFIX}/{id}",
            self.media_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRecord {
    pub id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub created_at: OffsetDateTime,
    pub task_id: Option<String>,
    pub state: RenderState,
    pub logs: Option<String>,
}

impl RenderRecord {
    /// A fresh, unsubmitted record for `source`.
    pub fn new(source: SourceRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_type: source.source_type,
            source_id: source.source_id,
            created_at: OffsetDateTime::now_utc(),
            task_id: None,
            state: RenderState::Pending,
            logs: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.task_id.is_some()
    }

    pub fn resolve_source_location(&self, templates: &SourceTemplates) -> Result<Url, DomainError> {
        templates.resolve(self.source_type, &self.source_id)
    }

    pub fn resolve_output_location(&self, layout: &OutputLayout) -> String {
        layout.output_location(self.id)
    }

    pub fn html_location(&self, layout: &OutputLayout) -> String {
        format!("{}/{ENTRY_POINT}", self.resolve_output_location(layout))
    }

    /// Public URL of the rendered output; `None` until the render succeeded.
    pub fn output_url(&self, layout: &OutputLayout) -> Option<String> {
        (self.state == RenderState::Success).then(|| layout.output_url(self.id))
    }

    /// Re-derive `state` (and `logs`, when the report carries them) from a queue report.
    pub fn apply_report(&mut self, report: &TaskReport) {
        self.state = report.render_state();
        if let Some(logs) = report.logs() {
            self.logs = Some(logs.to_string());
        }
    }
}
