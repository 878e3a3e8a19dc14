pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{Router, routing::get};

pub fn build_api_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/v1/renders",
            get(handlers::list_renders).put(handlers::put_render),
        )
        .route("/api/v1/renders/latest", get(handlers::get_latest_render))
        .route("/api/v1/renders/{id}", get(handlers::get_render))
        .with_state(state)
}
