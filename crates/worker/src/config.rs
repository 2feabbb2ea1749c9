use std::str::FromStr;
use std::time::Duration;

use forma_pipeline::PipelineSettings;

/// A variable that is missing or does not parse.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Pool size (default: `10`).
    pub db_max_connections: u32,
    pub extraction_url: String,
    pub render_url: String,
    /// Identity recorded as `worker:<name>` on claims.
    pub worker_name: String,
    pub poll_interval: Duration,
    /// Jobs run at once by this process.
    pub max_concurrent_jobs: usize,
    pub confidence_floor: f64,
    pub bulk_retry_concurrency: usize,
    pub recent_log_limit: i64,
    /// Per-request timeout for both collaborators.
    pub collab_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                  |
    /// |--------------------------|--------------------------|
    /// | `DATABASE_URL`           | required                 |
    /// | `DB_MAX_CONNECTIONS`     | `10`                     |
    /// | `EXTRACTION_URL`         | `http://localhost:8401`  |
    /// | `RENDER_URL`             | `http://localhost:8402`  |
    /// | `WORKER_NAME`            | `worker-<random>`        |
    /// | `POLL_INTERVAL_MS`       | `1000`                   |
    /// | `MAX_CONCURRENT_JOBS`    | `4`                      |
    /// | `CONFIDENCE_FLOOR`       | `0.0`                    |
    /// | `BULK_RETRY_CONCURRENCY` | `8`                      |
    /// | `RECENT_LOG_LIMIT`       | `50`                     |
    /// | `COLLAB_TIMEOUT_SECS`    | `120`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let extraction_url =
            lookup("EXTRACTION_URL").unwrap_or_else(|| "http://localhost:8401".into());
        let render_url = lookup("RENDER_URL").unwrap_or_else(|| "http://localhost:8402".into());

        let worker_name = match lookup("WORKER_NAME") {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            Some(name) => {
                return Err(ConfigError::Invalid {
                    var: "WORKER_NAME",
                    value: name,
                    reason: "must not be blank".into(),
                })
            }
            None => format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        };

        let poll_interval_ms: u64 = parse(&lookup, "POLL_INTERVAL_MS", 1000)?;
        let max_concurrent_jobs: usize = parse(&lookup, "MAX_CONCURRENT_JOBS", 4)?;
        let bulk_retry_concurrency: usize = parse(&lookup, "BULK_RETRY_CONCURRENCY", 8)?;
        let recent_log_limit: i64 = parse(&lookup, "RECENT_LOG_LIMIT", 50)?;
        let collab_timeout_secs: u64 = parse(&lookup, "COLLAB_TIMEOUT_SECS", 120)?;
        let db_max_connections: u32 = parse(&lookup, "DB_MAX_CONNECTIONS", 10)?;

        for (var, value) in [
            ("POLL_INTERVAL_MS", poll_interval_ms),
            ("MAX_CONCURRENT_JOBS", max_concurrent_jobs as u64),
            ("BULK_RETRY_CONCURRENCY", bulk_retry_concurrency as u64),
            ("COLLAB_TIMEOUT_SECS", collab_timeout_secs),
            ("DB_MAX_CONNECTIONS", u64::from(db_max_connections)),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    var,
                    value: "0".into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if recent_log_limit <= 0 {
            return Err(ConfigError::Invalid {
                var: "RECENT_LOG_LIMIT",
                value: recent_log_limit.to_string(),
                reason: "must be greater than zero".into(),
            });
        }

        let confidence_floor: f64 = parse(&lookup, "CONFIDENCE_FLOOR", 0.0)?;
        if !(0.0..=1.0).contains(&confidence_floor) {
            return Err(ConfigError::Invalid {
                var: "CONFIDENCE_FLOOR",
                value: confidence_floor.to_string(),
                reason: "must be between 0.0 and 1.0".into(),
            });
        }

        Ok(Self {
            database_url,
            db_max_connections,
            extraction_url,
            render_url,
            worker_name,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_concurrent_jobs,
            confidence_floor,
            bulk_retry_concurrency,
            recent_log_limit,
            collab_timeout: Duration::from_secs(collab_timeout_secs),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            worker_name: self.worker_name.clone(),
            confidence_floor: self.confidence_floor,
            max_concurrent_jobs: self.max_concurrent_jobs,
            bulk_retry_concurrency: self.bulk_retry_concurrency,
            recent_log_limit: self.recent_log_limit,
        }
    }
}

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
