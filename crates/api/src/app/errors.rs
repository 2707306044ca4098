use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use neuroviz_core::DomainError;
use neuroviz_infra::jobs::JobError;

pub fn job_error_to_response(err: JobError) -> axum::response::Response {
    match err {
        JobError::SessionNotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "session_not_found",
            format!("session not found: {id}"),
        ),
        JobError::JobNotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "job_not_found",
            format!("job not found: {id}"),
        ),
        JobError::InvalidParameters(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_parameters", msg)
        }
        JobError::InvalidStateTransition { from, to } => json_error(
            StatusCode::CONFLICT,
            "invalid_state_transition",
            format!("invalid state transition: {from} -> {to}"),
        ),
        JobError::ComputeUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "compute_unavailable", msg)
        }
        JobError::ComputeRejected { status, message } => json_error(
            StatusCode::BAD_GATEWAY,
            "compute_rejected",
            format!("compute service returned {status}: {message}"),
        ),
        JobError::Store(e) => {
            tracing::error!(error = %e, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        JobError::Dispatch(e) => {
            tracing::error!(error = %e, "job dispatch failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "dispatch_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path identifier, answering 400 when it is not a UUID.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
