// routes.rs
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;

use crate::handlers;

pub fn create_routes(pool: PgPool) -> Router {
    Router::new()
        .route("/poll/active", get(handlers::get_active_polls))
        .route("/poll/by-title", get(handlers::get_poll_by_title))
        .route("/poll/by-slug", get(handlers::get_poll_by_slug))
        .route("/poll/status/by-title", get(handlers::get_status_by_title))
        .route("/poll/status/by-slug", get(handlers::get_status_by_slug))
        .route("/poll/{poll_id}", get(handlers::get_poll_detail))
        .route("/poll/{poll_id}/submit", post(handlers::submit_votes))
        .with_state(pool)
}
