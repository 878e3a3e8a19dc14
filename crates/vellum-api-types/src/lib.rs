//! Wire types shared between the Vellum server and its clients.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Where a document's raw source is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "render_source_type", rename_all = "snake_case")
)]
pub enum SourceType {
    Arxiv,
    Submission,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Arxiv => "arxiv",
            SourceType::Submission => "submission",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source type `{0}`")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "arxiv" => Ok(SourceType::Arxiv),
            "submission" => Ok(SourceType::Submission),
            other => Err(UnknownSourceType(other.to_string())),
        }
    }
}

/// Lifecycle state of a render as last observed from the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "render_state", rename_all = "snake_case")
)]
pub enum RenderState {
    #[default]
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

impl RenderState {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderState::Pending => "PENDING",
            RenderState::Started => "STARTED",
            RenderState::Retry => "RETRY",
            RenderState::Success => "SUCCESS",
            RenderState::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown render state `{0}`")]
pub struct UnknownRenderState(pub String);

impl FromStr for RenderState {
    type Err = UnknownRenderState;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RenderState::Pending),
            "STARTED" => Ok(RenderState::Started),
            "RETRY" => Ok(RenderState::Retry),
            "SUCCESS" => Ok(RenderState::Success),
            "FAILURE" => Ok(RenderState::Failure),
            _ => Err(UnknownRenderState(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderResponse {
    pub id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub state: RenderState,
    pub output_url: Option<String>,
    pub logs: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderListResponse {
    pub items: Vec<RenderResponse>,
}
