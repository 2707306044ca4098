use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value as JsonValue;

use neuroviz_core::SessionId;
use neuroviz_infra::jobs::{JobKind, MAX_LISTED_JOBS};

use crate::app::{dto, errors, services::AppServices};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id/preprocess", post(submit_preprocess))
        .route("/:id/jobs", post(submit_job).get(list_jobs))
        .route("/:id/jobs/latest", get(latest_job))
        .route("/:id/analytics/psd", get(psd))
        .route("/:id/analytics/bandpower", get(band_power))
        .route("/:id/classify", post(classify))
}

fn session_id(raw: &str) -> Result<SessionId, axum::response::Response> {
    errors::parse_id(raw)
}

fn accepted(job: neuroviz_infra::jobs::Job) -> axum::response::Response {
    (StatusCode::ACCEPTED, Json(dto::JobResponse::from(job))).into_response()
}

/// Create and dispatch a PREPROCESS job. Omitted fields take their defaults.
pub async fn submit_preprocess(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    let params = match dto::json_body(&body) {
        Ok(p) => p,
        Err(res) => return res,
    };

    match services
        .lifecycle()
        .submit(caller.user_id(), session, JobKind::Preprocess, &params)
        .await
    {
        Ok(job) => accepted(job),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// Create and dispatch a job of any kind.
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    let raw = match dto::json_body(&body) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let request: dto::SubmitJobRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_parameters",
                format!("expected {{\"kind\": ..., \"params\": ...}}: {e}"),
            );
        }
    };
    let kind = match dto::parse_kind(&request.kind) {
        Ok(k) => k,
        Err(res) => return res,
    };

    match services
        .lifecycle()
        .submit(caller.user_id(), session, kind, &request.params)
        .await
    {
        Ok(job) => accepted(job),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// Jobs of a session, newest first.
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    let limit = query.limit.unwrap_or(MAX_LISTED_JOBS);

    match services
        .lifecycle()
        .list_session_jobs(caller.user_id(), session, limit)
        .await
    {
        Ok(jobs) => Json(
            jobs.into_iter()
                .map(dto::JobResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// Most recent COMPLETED job of a kind.
pub async fn latest_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::LatestJobQuery>,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    let kind = match query.kind.as_deref() {
        Some(raw) => match dto::parse_kind(raw) {
            Ok(k) => k,
            Err(res) => return res,
        },
        None => JobKind::Preprocess,
    };

    match services
        .lifecycle()
        .latest_completed(caller.user_id(), session, kind)
        .await
    {
        Ok(Some(job)) => Json(dto::JobResponse::from(job)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "job_not_found",
            format!("no completed {kind} job for session {session}"),
        ),
        Err(e) => errors::job_error_to_response(e),
    }
}

fn direct(result: Result<JsonValue, neuroviz_infra::jobs::JobError>) -> axum::response::Response {
    match result {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

/// Untracked PSD for one channel.
pub async fn psd(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::ChannelQuery>,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    let channel = query.channel.unwrap_or_default();
    direct(services.lifecycle().psd(caller.user_id(), session, &channel).await)
}

/// Untracked band power for one channel.
pub async fn band_power(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::ChannelQuery>,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    let channel = query.channel.unwrap_or_default();
    direct(
        services
            .lifecycle()
            .band_power(caller.user_id(), session, &channel)
            .await,
    )
}

/// Untracked classification.
pub async fn classify(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let session = match session_id(&id) {
        Ok(s) => s,
        Err(res) => return res,
    };
    direct(services.lifecycle().classify(caller.user_id(), session).await)
}
