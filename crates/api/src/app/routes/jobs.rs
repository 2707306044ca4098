use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
};

use neuroviz_core::JobId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new().route("/:id", get(get_job))
}

/// Current snapshot of a job owned by the caller.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services
        .lifecycle()
        .get_status_for(caller.user_id(), job_id)
        .await
    {
        Ok(job) => Json(dto::JobResponse::from(job)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
