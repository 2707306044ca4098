use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{Value as JsonValue, json};

use super::error::ComputeError;
use super::types::ComputeRequest;

/// Outbound calls to the EEG compute service.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Perform one operation and return the service's JSON payload.
    async fn invoke(&self, request: &ComputeRequest) -> Result<JsonValue, ComputeError>;

    /// Probe the service. Clients without a probe report healthy.
    async fn health(&self) -> Result<JsonValue, ComputeError> {
        Ok(json!({"status": "unknown"}))
    }
}

/// HTTP/JSON client for the compute service.
pub struct HttpComputeClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpComputeClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a client pointing at `base_url` (e.g. `http://localhost:8001`).
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ComputeError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ComputeError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ComputeError> {
        Self::new(base_url, Self::DEFAULT_TIMEOUT, Self::DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, err: reqwest::Error) -> ComputeError {
        if err.is_timeout() {
            ComputeError::Timeout(self.timeout.as_secs())
        } else {
            ComputeError::Unavailable(err.to_string())
        }
    }

    async fn read_json(&self, response: Response) -> Result<JsonValue, ComputeError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                body
            };
            return Err(ComputeError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| ComputeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ComputeClient for HttpComputeClient {
    async fn invoke(&self, request: &ComputeRequest) -> Result<JsonValue, ComputeError> {
        let sent = match request {
            ComputeRequest::Preprocess { file_path, params } => {
                // The service expects the filter settings as an embedded JSON string.
                let encoded = json!({
                    "bandpass": params.bandpass,
                    "notch": params.notch,
                    "artifact": params.artifact_rejection,
                })
                .to_string();
                self.client
                    .post(self.url("/preprocess/"))
                    .json(&json!({"file_path": file_path, "params": encoded}))
                    .send()
                    .await
            }
            ComputeRequest::PowerSpectralDensity { file_path, channel } => {
                self.client
                    .get(self.url("/analytics/psd"))
                    .query(&[("file", file_path.as_str()), ("channel", channel.as_str())])
                    .send()
                    .await
            }
            ComputeRequest::BandPower { file_path, channel } => {
                self.client
                    .get(self.url("/analytics/bandpower"))
                    .query(&[("file", file_path.as_str()), ("channel", channel.as_str())])
                    .send()
                    .await
            }
            ComputeRequest::Classify { file_path } => {
                self.client
                    .post(self.url("/classify/"))
                    .json(&json!({"file_path": file_path}))
                    .send()
                    .await
            }
        };

        let response = sent.map_err(|e| self.transport_error(e))?;
        self.read_json(response).await
    }

    async fn health(&self) -> Result<JsonValue, ComputeError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.read_json(response).await
    }
}
