use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use neuroviz_infra::jobs::{Job, JobFailure, JobKind, JobState};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub params: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    pub channel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestJobQuery {
    pub kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub session_id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub params: JsonValue,
    pub result: Option<JsonValue>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            session_id: job.session_id.to_string(),
            kind: job.kind,
            state: job.state,
            params: job.params,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

// -------------------------
// Body helpers
// -------------------------

/// Decode an optional JSON body. An empty body decodes as `null`.
///
/// Malformed JSON is answered with the same 400 shape as parameter
/// validation failures.
pub fn json_body(bytes: &[u8]) -> Result<JsonValue, axum::response::Response> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonValue::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_parameters",
            format!("request body is not valid JSON: {e}"),
        )
    })
}

pub fn parse_kind(raw: &str) -> Result<JobKind, axum::response::Response> {
    raw.parse::<JobKind>().map_err(|e| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_parameters",
            e.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_null() {
        assert_eq!(json_body(b"").unwrap(), JsonValue::Null);
        assert_eq!(json_body(b"  \n").unwrap(), JsonValue::Null);
        assert_eq!(json_body(br#"{"notch": 60}"#).unwrap()["notch"], 60);
        assert!(json_body(b"{notch").is_err());
    }

    #[test]
    fn kind_is_validated() {
        assert_eq!(parse_kind("analytics").unwrap(), JobKind::Analytics);
        assert_eq!(
            parse_kind("bogus").unwrap_err().status(),
            axum::http::StatusCode::BAD_REQUEST
        );
    }
}
