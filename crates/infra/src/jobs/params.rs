//! Job parameter contracts and validation.
//!
//! Parameters are validated before any job record exists. The job records
//! the caller's object as given, plus defaults for any omitted field; the
//! typed form is what gets sent to the compute service.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use neuroviz_core::{DomainError, DomainResult};

use super::types::JobKind;

/// Accepted spellings of the artifact rejection flag.
const ARTIFACT_REJECTION_KEYS: [&str; 3] = ["artifactRejection", "artifact_rejection", "artifact"];

/// Mains frequencies the notch filter may target.
pub const ALLOWED_NOTCH_HZ: [u16; 2] = [50, 60];

fn default_bandpass() -> [f64; 2] {
    [1.0, 40.0]
}

fn default_notch() -> u16 {
    50
}

fn default_artifact_rejection() -> bool {
    true
}

/// Parameters of a PREPROCESS job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreprocessParams {
    /// `[low, high]` band-pass cutoffs in Hz.
    #[serde(default = "default_bandpass")]
    pub bandpass: [f64; 2],
    /// Notch filter frequency in Hz.
    #[serde(default = "default_notch")]
    pub notch: u16,
    #[serde(
        default = "default_artifact_rejection",
        rename = "artifactRejection",
        alias = "artifact_rejection",
        alias = "artifact"
    )]
    pub artifact_rejection: bool,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            bandpass: default_bandpass(),
            notch: default_notch(),
            artifact_rejection: default_artifact_rejection(),
        }
    }
}

impl PreprocessParams {
    pub fn validate(&self) -> DomainResult<()> {
        let [low, high] = self.bandpass;
        if !low.is_finite() || !high.is_finite() {
            return Err(DomainError::validation("bandpass cutoffs must be finite numbers"));
        }
        if low <= 0.0 {
            return Err(DomainError::validation(format!(
                "bandpass low cutoff must be positive, got {low}"
            )));
        }
        if low >= high {
            return Err(DomainError::validation(format!(
                "bandpass low cutoff ({low}) must be below high cutoff ({high})"
            )));
        }
        if !ALLOWED_NOTCH_HZ.contains(&self.notch) {
            return Err(DomainError::validation(format!(
                "notch must be 50 or 60 Hz, got {}",
                self.notch
            )));
        }
        Ok(())
    }
}

/// Spectral metric computed by an ANALYTICS job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsMetric {
    Psd,
    #[serde(alias = "bandpower")]
    BandPower,
}

/// Parameters of an ANALYTICS job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsParams {
    pub channel: String,
    pub metric: AnalyticsMetric,
}

impl AnalyticsParams {
    pub fn validate(&self) -> DomainResult<()> {
        if self.channel.trim().is_empty() {
            return Err(DomainError::validation("channel must not be empty"));
        }
        Ok(())
    }
}

/// Validated parameters for any job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    Preprocess(PreprocessParams),
    Analytics(AnalyticsParams),
    Classify,
}

impl JobParams {
    /// Parse and validate raw parameters for `kind`.
    ///
    /// `null` is treated as an empty object so kinds with full defaults
    /// can be submitted without a body.
    pub fn parse(kind: JobKind, raw: &JsonValue) -> DomainResult<Self> {
        let raw = match raw {
            JsonValue::Null => JsonValue::Object(Default::default()),
            JsonValue::Object(_) => raw.clone(),
            _ => {
                return Err(DomainError::validation(format!(
                    "{kind} parameters must be a JSON object"
                )));
            }
        };

        match kind {
            JobKind::Preprocess => {
                let params: PreprocessParams = serde_json::from_value(raw)
                    .map_err(|e| DomainError::validation(format!("invalid PREPROCESS parameters: {e}")))?;
                params.validate()?;
                Ok(JobParams::Preprocess(params))
            }
            JobKind::Analytics => {
                let params: AnalyticsParams = serde_json::from_value(raw)
                    .map_err(|e| DomainError::validation(format!("invalid ANALYTICS parameters: {e}")))?;
                params.validate()?;
                Ok(JobParams::Analytics(params))
            }
            JobKind::Classify => {
                if raw.as_object().is_some_and(|o| !o.is_empty()) {
                    return Err(DomainError::validation("CLASSIFY takes no parameters"));
                }
                Ok(JobParams::Classify)
            }
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Preprocess(_) => JobKind::Preprocess,
            JobParams::Analytics(_) => JobKind::Analytics,
            JobParams::Classify => JobKind::Classify,
        }
    }

    /// Normalized JSON form with canonical keys.
    pub fn to_value(&self) -> JsonValue {
        match self {
            JobParams::Preprocess(p) => serde_json::json!({
                "bandpass": p.bandpass,
                "notch": p.notch,
                "artifactRejection": p.artifact_rejection,
            }),
            JobParams::Analytics(p) => serde_json::json!({
                "channel": p.channel,
                "metric": p.metric,
            }),
            JobParams::Classify => JsonValue::Object(Default::default()),
        }
    }

    /// What a job records: `raw` unchanged, with defaults added for fields
    /// the caller left out. `raw` must be the value these params were
    /// parsed from.
    pub fn recorded(&self, raw: &JsonValue) -> JsonValue {
        let mut recorded = match raw {
            JsonValue::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let has_artifact_flag = ARTIFACT_REJECTION_KEYS
            .iter()
            .any(|key| recorded.contains_key(*key));

        if let JsonValue::Object(normalized) = self.to_value() {
            for (key, value) in normalized {
                if key == "artifactRejection" && has_artifact_flag {
                    continue;
                }
                recorded.entry(key).or_insert(value);
            }
        }
        JsonValue::Object(recorded)
    }
}
