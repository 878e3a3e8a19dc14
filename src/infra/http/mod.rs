pub mod api;
mod middleware;

pub use api::{ApiState, build_api_router};

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use sqlx::Error as SqlxError;

use crate::application::error::ErrorReport;
use crate::infra::db::PostgresRepositories;

use self::middleware::{log_responses, set_request_context};

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

async fn health(State(db): State<Arc<PostgresRepositories>>) -> Response {
    db_health_response(db.health_check().await)
}

pub fn build_health_router(db: Arc<PostgresRepositories>) -> Router {
    Router::new().route("/health", get(health)).with_state(db)
}

/// The full HTTP surface: render API plus the health probe, with request logging.
pub fn build_router(api: ApiState, db: Arc<PostgresRepositories>) -> Router {
    with_request_logging(build_api_router(api).merge(build_health_router(db)))
}

pub fn with_request_logging(router: Router) -> Router {
    router
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
