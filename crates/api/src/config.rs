use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderValue;
use bimbridge_pipeline::PipelineConfig;

/// Startup configuration problems. The server refuses to start on any of them.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} is required when {because} is set")]
    Missing {
        var: &'static str,
        because: &'static str,
    },
}

/// Cloud derivative service credentials.
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub base_url: String,
    pub access_token: String,
    pub bucket: String,
}

/// Which conversion backends are configured. Unset means disabled.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub cloud: Option<CloudSettings>,
    pub bridge_url: Option<String>,
    pub plugin_ws_url: Option<String>,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Backends are
/// opt-in: each one is enabled only when its URL variable is set.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub job_ttl_minutes: u64,
    pub job_cleanup_interval_secs: u64,
    pub job_grace_secs: u64,
    /// Root directory for per-job staging folders.
    pub job_storage_root: PathBuf,
    pub max_upload_mb: u64,
    /// Interval between WebSocket Ping frames (default: `30`).
    pub ws_heartbeat_secs: u64,
    pub backends: BackendSettings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                    |
    /// |--------------------------------|----------------------------|
    /// | `HOST`                         | `0.0.0.0`                  |
    /// | `PORT`                         | `3000`                     |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`         | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`        | `30`                       |
    /// | `JOB_TTL_MINUTES`              | `180`                      |
    /// | `JOB_CLEANUP_INTERVAL_SECONDS` | `60`                       |
    /// | `JOB_GRACE_SECONDS`            | `30`                       |
    /// | `JOB_STORAGE_ROOT`             | `$TMPDIR/bimbridge_jobs`   |
    /// | `MAX_UPLOAD_MB`                | `500`                      |
    /// | `WS_HEARTBEAT_SECS`            | `30`                       |
    /// | `CLOUD_BASE_URL`               | unset (cloud disabled)     |
    /// | `BRIDGE_URL`                   | unset (bridge disabled)    |
    /// | `PLUGIN_WS_URL`                | unset (plugin disabled)    |
    ///
    /// `CLOUD_ACCESS_TOKEN` and `CLOUD_BUCKET` are required once
    /// `CLOUD_BASE_URL` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", var("PORT"), 3000)?;

        let cors_origins: Vec<String> = var("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for origin in &cors_origins {
            HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                var: "CORS_ORIGINS",
                value: origin.clone(),
                reason: e.to_string(),
            })?;
        }

        let request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", var("REQUEST_TIMEOUT_SECS"), 30)?;
        let shutdown_timeout_secs = parse_var("SHUTDOWN_TIMEOUT_SECS", var("SHUTDOWN_TIMEOUT_SECS"), 30)?;
        let job_ttl_minutes = parse_var("JOB_TTL_MINUTES", var("JOB_TTL_MINUTES"), 180)?;
        let job_cleanup_interval_secs = parse_var(
            "JOB_CLEANUP_INTERVAL_SECONDS",
            var("JOB_CLEANUP_INTERVAL_SECONDS"),
            60,
        )?;
        let job_grace_secs = parse_var("JOB_GRACE_SECONDS", var("JOB_GRACE_SECONDS"), 30)?;
        let max_upload_mb = parse_var("MAX_UPLOAD_MB", var("MAX_UPLOAD_MB"), 500)?;
        let ws_heartbeat_secs = parse_var("WS_HEARTBEAT_SECS", var("WS_HEARTBEAT_SECS"), 30)?;

        require_positive("JOB_CLEANUP_INTERVAL_SECONDS", job_cleanup_interval_secs)?;
        require_positive("WS_HEARTBEAT_SECS", ws_heartbeat_secs)?;
        require_positive("MAX_UPLOAD_MB", max_upload_mb)?;

        let job_storage_root = var("JOB_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("bimbridge_jobs"));

        let cloud = match var("CLOUD_BASE_URL") {
            Some(base_url) => Some(CloudSettings {
                base_url,
                access_token: var("CLOUD_ACCESS_TOKEN").ok_or(ConfigError::Missing {
                    var: "CLOUD_ACCESS_TOKEN",
                    because: "CLOUD_BASE_URL",
                })?,
                bucket: var("CLOUD_BUCKET").ok_or(ConfigError::Missing {
                    var: "CLOUD_BUCKET",
                    because: "CLOUD_BASE_URL",
                })?,
            }),
            None => None,
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            job_ttl_minutes,
            job_cleanup_interval_secs,
            job_grace_secs,
            job_storage_root,
            max_upload_mb,
            ws_heartbeat_secs,
            backends: BackendSettings {
                cloud,
                bridge_url: var("BRIDGE_URL"),
                plugin_ws_url: var("PLUGIN_WS_URL"),
            },
        })
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    /// Timing and size limits handed to the conversion service.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            job_ttl: Duration::from_secs(self.job_ttl_minutes * 60),
            grace_period: Duration::from_secs(self.job_grace_secs),
            sweep_interval: Duration::from_secs(self.job_cleanup_interval_secs),
            max_upload_bytes: self.max_upload_bytes(),
        }
    }
}

fn parse_var<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn require_positive(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var: name,
            value: "0".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}
