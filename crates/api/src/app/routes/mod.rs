use axum::{Router, routing::get};

pub mod jobs;
pub mod sessions;
pub mod system;

/// Router for all authenticated (caller-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/sessions", sessions::router())
        .nest("/jobs", jobs::router())
}
