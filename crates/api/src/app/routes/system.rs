use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::{errors, services::AppServices};
use crate::context::CallerContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Probe the compute service through the engine's client.
pub async fn compute_health(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.lifecycle().compute_health().await {
        Ok(body) => Json(serde_json::json!({
            "status": "ok",
            "compute": body,
        }))
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn whoami(Extension(caller): Extension<CallerContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": caller.user_id().to_string(),
    }))
}
