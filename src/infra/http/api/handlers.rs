use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::renders::RenderError;
use crate::application::repos::{RenderQueryFilter, RepoError};
use crate::domain::renders::SourceRef;
use crate::domain::types::{RenderState, SourceType};

use super::error::{ApiError, codes};
use super::models::{
    RenderListQuery, RenderSourceQuery, render_list_response, render_response,
};
use super::state::ApiState;

const DEFAULT_LIST_LIMIT: u32 = 50;

fn require_source(query: RenderSourceQuery) -> Result<(String, String), ApiError> {
    match (query.source_type, query.source_id) {
        (Some(source_type), Some(source_id)) => Ok((source_type, source_id)),
        _ => Err(ApiError::bad_request(
            "source_type and source_id are required",
            None,
        )),
    }
}

/// `PUT /api/v1/renders`: latest render for a document, started if none exists.
pub async fn put_render(
    State(state): State<ApiState>,
    Query(query): Query<RenderSourceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (source_type, source_id) = require_source(query)?;

    let (record, created) = state
        .renders
        .dispatch(&source_type, &source_id)
        .await
        .map_err(render_to_api)?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(render_response(record, state.renders.layout())),
    ))
}

pub async fn get_render(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.renders.load(id).await.map_err(render_to_api)?;
    Ok(Json(render_response(record, state.renders.layout())))
}

/// Lookup only; never creates a render.
pub async fn get_latest_render(
    State(state): State<ApiState>,
    Query(query): Query<RenderSourceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (source_type, source_id) = require_source(query)?;
    let source = SourceRef::parse(&source_type, &source_id)
        .map_err(|err| render_to_api(err.into()))?;

    let record = state.renders.latest(&source).await.map_err(render_to_api)?;
    Ok(Json(render_response(record, state.renders.layout())))
}

pub async fn list_renders(
    State(state): State<ApiState>,
    Query(query): Query<RenderListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let render_state = query
        .state
        .as_deref()
        .map(str::parse::<RenderState>)
        .transpose()
        .map_err(|err| ApiError::bad_request("Invalid render state", Some(err.to_string())))?;
    let source_type = query
        .source_type
        .as_deref()
        .map(str::parse::<SourceType>)
        .transpose()
        .map_err(|err| render_to_api(RenderError::UnknownSourceType(err.0)))?;

    let filter = RenderQueryFilter {
        state: render_state,
        source_type,
    };
    let records = state
        .renders
        .list(&filter, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await
        .map_err(render_to_api)?;

    Ok(Json(render_list_response(records, state.renders.layout())))
}

fn render_to_api(err: RenderError) -> ApiError {
    match err {
        RenderError::UnknownSourceType(value) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::UNKNOWN_SOURCE_TYPE,
            "Unknown source type",
            Some(format!(
                "`{value}` is not one of: {}, {}",
                SourceType::Arxiv,
                SourceType::Submission
            )),
        ),
        RenderError::Validation(message) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid render request",
            Some(message),
        ),
        RenderError::AlreadyStarted(id) => ApiError::new(
            StatusCode::CONFLICT,
            codes::ALREADY_STARTED,
            "Render has already been started",
            Some(id.to_string()),
        ),
        RenderError::NotFound => ApiError::not_found("render not found"),
        RenderError::Repo(repo) => repo_to_api(repo),
    }
}

fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Duplicate record",
            Some(constraint),
        ),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => {
            ApiError::internal(codes::INTEGRITY, "Integrity constraint violated", message)
        }
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "Database timeout",
            None,
        ),
        RepoError::Persistence(message) => {
            ApiError::internal(codes::REPO, "Persistence error", message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_client_statuses() {
        let unknown = render_to_api(RenderError::UnknownSourceType("gopher".into()));
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unknown.code(), codes::UNKNOWN_SOURCE_TYPE);

        let started = render_to_api(RenderError::AlreadyStarted(Uuid::nil()));
        assert_eq!(started.status(), StatusCode::CONFLICT);

        assert_eq!(
            render_to_api(RenderError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn persistence_failures_hide_their_detail() {
        let err = render_to_api(RenderError::Repo(RepoError::Persistence(
            "connection reset by peer".into(),
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), codes::REPO);

        let response = err.into_response();
        let report = response
            .extensions()
            .get::<crate::application::error::ErrorReport>()
            .cloned()
            .expect("error report attached");
        assert!(report.messages[0].contains("connection reset by peer"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(!body.contains("connection reset"));
        assert!(body.contains("repo_error"));
    }
}
