//! Requests the compute service understands.

use crate::jobs::params::{AnalyticsMetric, JobParams, PreprocessParams};

/// One compute-service operation, bound to the recording it reads.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeRequest {
    Preprocess {
        file_path: String,
        params: PreprocessParams,
    },
    PowerSpectralDensity {
        file_path: String,
        channel: String,
    },
    BandPower {
        file_path: String,
        channel: String,
    },
    Classify {
        file_path: String,
    },
}

impl ComputeRequest {
    /// Build the request a job with `params` issues against `data_locator`.
    pub fn for_job(params: &JobParams, data_locator: &str) -> Self {
        let file_path = data_locator.to_string();
        match params {
            JobParams::Preprocess(p) => ComputeRequest::Preprocess {
                file_path,
                params: p.clone(),
            },
            JobParams::Analytics(a) => match a.metric {
                AnalyticsMetric::Psd => ComputeRequest::PowerSpectralDensity {
                    file_path,
                    channel: a.channel.clone(),
                },
                AnalyticsMetric::BandPower => ComputeRequest::BandPower {
                    file_path,
                    channel: a.channel.clone(),
                },
            },
            JobParams::Classify => ComputeRequest::Classify { file_path },
        }
    }

    /// Short operation name for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            ComputeRequest::Preprocess { .. } => "preprocess",
            ComputeRequest::PowerSpectralDensity { .. } => "psd",
            ComputeRequest::BandPower { .. } => "band_power",
            ComputeRequest::Classify { .. } => "classify",
        }
    }

    pub fn file_path(&self) -> &str {
        match self {
            ComputeRequest::Preprocess { file_path, .. }
            | ComputeRequest::PowerSpectralDensity { file_path, .. }
            | ComputeRequest::BandPower { file_path, .. }
            | ComputeRequest::Classify { file_path } => file_path,
        }
    }
}
