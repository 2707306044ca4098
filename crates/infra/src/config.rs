//! Configuration loading and representation.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_COMPUTE_URL: &str = "http://localhost:8001";
pub const DEFAULT_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Process settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub compute_url: String,
    pub compute_timeout: Duration,
    pub compute_connect_timeout: Duration,
    pub dispatch_max_concurrent: usize,
    pub sweep_interval: Duration,
    /// `None` disables the stale-job sweep.
    pub sweep_max_running: Option<Duration>,
    /// `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// True when `jwt_secret` fell back to the insecure default.
    pub jwt_secret_is_default: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("NEUROVIZ_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            var: "NEUROVIZ_BIND_ADDR",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let compute_url = get("NEUROVIZ_COMPUTE_URL").unwrap_or_else(|| DEFAULT_COMPUTE_URL.to_string());
        if !(compute_url.starts_with("http://") || compute_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "NEUROVIZ_COMPUTE_URL",
                value: compute_url,
                reason: "must be an http(s) URL".into(),
            });
        }

        let compute_timeout = secs(&get, "NEUROVIZ_COMPUTE_TIMEOUT_SECS", 120)?;
        let compute_connect_timeout = secs(&get, "NEUROVIZ_COMPUTE_CONNECT_TIMEOUT_SECS", 10)?;
        let dispatch_max_concurrent = positive(&get, "NEUROVIZ_DISPATCH_MAX_CONCURRENT", 4)? as usize;
        let sweep_interval = secs(&get, "NEUROVIZ_SWEEP_INTERVAL_SECS", 60)?;
        let sweep_max_running = match get("NEUROVIZ_SWEEP_MAX_RUNNING_SECS") {
            None => None,
            Some(_) => Some(secs(&get, "NEUROVIZ_SWEEP_MAX_RUNNING_SECS", 0)?),
        };
        // The sweep must never fail a job whose compute call can still return.
        if let Some(max_running) = sweep_max_running {
            if max_running <= compute_timeout {
                return Err(ConfigError::Invalid {
                    var: "NEUROVIZ_SWEEP_MAX_RUNNING_SECS",
                    value: max_running.as_secs().to_string(),
                    reason: format!(
                        "must exceed NEUROVIZ_COMPUTE_TIMEOUT_SECS ({})",
                        compute_timeout.as_secs()
                    ),
                });
            }
        }

        let (jwt_secret, jwt_secret_is_default) = match get("JWT_SECRET") {
            Some(secret) => (secret, false),
            None => (DEFAULT_JWT_SECRET.to_string(), true),
        };

        Ok(Self {
            bind_addr,
            compute_url,
            compute_timeout,
            compute_connect_timeout,
            dispatch_max_concurrent,
            sweep_interval,
            sweep_max_running,
            database_url: get("DATABASE_URL"),
            jwt_secret,
            jwt_secret_is_default,
        })
    }
}

fn positive(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = get(var) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "must be greater than zero".into(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    positive(get, var, default).map(Duration::from_secs)
}
