//! Runtime configuration for the job manager and its worker pool.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}={value}: expected a non-negative integer")]
    InvalidNumber { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for [`crate::JobManager`].
///
/// Every field has a default, so partial documents deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    pub default_job_timeout_secs: u64,
    /// Submissions asking for more than this are rejected.
    pub max_job_timeout_secs: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_secs: u64,
    /// Terminal jobs older than this are removed by the cleanup loop.
    pub job_retention_secs: u64,
    pub cleanup_interval_secs: u64,
    pub timeout_check_interval_ms: u64,
    pub dispatch_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// How long a cancelled executor may keep running before the worker
    /// abandons it.
    pub cancel_grace_ms: u64,
    /// Per-subscriber event buffer.
    pub event_buffer: usize,
    pub queue_call_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            default_job_timeout_secs: 60 * 60,
            max_job_timeout_secs: 24 * 60 * 60,
            default_max_retries: 3,
            default_retry_delay_secs: 5 * 60,
            job_retention_secs: 7 * 24 * 60 * 60,
            cleanup_interval_secs: 60 * 60,
            timeout_check_interval_ms: 30_000,
            dispatch_interval_ms: 1_000,
            shutdown_timeout_ms: 30_000,
            cancel_grace_ms: 5_000,
            event_buffer: 100,
            queue_call_timeout_ms: 5_000,
        }
    }
}

impl ManagerConfig {
    /// Read `JOBS_*` environment variables on top of the defaults.
    ///
    /// Recognised keys: `JOBS_WORKER_COUNT`, `JOBS_DEFAULT_TIMEOUT_SECS`,
    /// `JOBS_MAX_TIMEOUT_SECS`, `JOBS_MAX_RETRIES`, `JOBS_RETRY_DELAY_SECS`,
    /// `JOBS_RETENTION_SECS`, `JOBS_CLEANUP_INTERVAL_SECS`,
    /// `JOBS_TIMEOUT_CHECK_MS`, `JOBS_DISPATCH_INTERVAL_MS`,
    /// `JOBS_SHUTDOWN_TIMEOUT_MS`, `JOBS_CANCEL_GRACE_MS`, `JOBS_EVENT_BUFFER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        let read = |key: &str| -> Result<Option<u64>, ConfigError> {
            match lookup(key).map(|v| v.trim().to_string()) {
                None => Ok(None),
                Some(v) if v.is_empty() => Ok(None),
                Some(v) => v
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidNumber {
                        key: key.to_string(),
                        value: v,
                    }),
            }
        };

        if let Some(v) = read("JOBS_WORKER_COUNT")? {
            cfg.worker_count = v as usize;
        }
        if let Some(v) = read("JOBS_DEFAULT_TIMEOUT_SECS")? {
            cfg.default_job_timeout_secs = v;
        }
        if let Some(v) = read("JOBS_MAX_TIMEOUT_SECS")? {
            cfg.max_job_timeout_secs = v;
        }
        if let Some(v) = read("JOBS_MAX_RETRIES")? {
            cfg.default_max_retries = u32::try_from(v).map_err(|_| ConfigError::InvalidNumber {
                key: "JOBS_MAX_RETRIES".to_string(),
                value: v.to_string(),
            })?;
        }
        if let Some(v) = read("JOBS_RETRY_DELAY_SECS")? {
            cfg.default_retry_delay_secs = v;
        }
        if let Some(v) = read("JOBS_RETENTION_SECS")? {
            cfg.job_retention_secs = v;
        }
        if let Some(v) = read("JOBS_CLEANUP_INTERVAL_SECS")? {
            cfg.cleanup_interval_secs = v;
        }
        if let Some(v) = read("JOBS_TIMEOUT_CHECK_MS")? {
            cfg.timeout_check_interval_ms = v;
        }
        if let Some(v) = read("JOBS_DISPATCH_INTERVAL_MS")? {
            cfg.dispatch_interval_ms = v;
        }
        if let Some(v) = read("JOBS_SHUTDOWN_TIMEOUT_MS")? {
            cfg.shutdown_timeout_ms = v;
        }
        if let Some(v) = read("JOBS_CANCEL_GRACE_MS")? {
            cfg.cancel_grace_ms = v;
        }
        if let Some(v) = read("JOBS_EVENT_BUFFER")? {
            cfg.event_buffer = v as usize;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations the manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        if self.default_job_timeout_secs > self.max_job_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "default timeout {}s exceeds max timeout {}s",
                self.default_job_timeout_secs, self.max_job_timeout_secs
            )));
        }
        if self.dispatch_interval_ms == 0
            || self.timeout_check_interval_ms == 0
            || self.cleanup_interval_secs == 0
            || self.queue_call_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_default_job_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_max_job_timeout(mut self, timeout: Duration) -> Self {
        self.max_job_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.job_retention_secs = retention.as_secs();
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }

    pub fn default_job_timeout(&self) -> Duration {
        Duration::from_secs(self.default_job_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn queue_call_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.worker_count, 5);
        assert_eq!(cfg.default_job_timeout(), Duration::from_secs(3600));
        assert_eq!(cfg.max_job_timeout_secs, 86_400);
        assert_eq!(cfg.default_max_retries, 3);
        assert_eq!(cfg.default_retry_delay_secs, 300);
        assert_eq!(cfg.job_retention(), Duration::from_secs(7 * 86_400));
        assert_eq!(cfg.timeout_check_interval(), Duration::from_secs(30));
        assert_eq!(cfg.dispatch_interval(), Duration::from_secs(1));
        assert_eq!(cfg.event_buffer, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg: ManagerConfig =
            serde_json::from_value(serde_json::json!({ "worker_count": 2 })).unwrap();
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn lookup_overrides_and_rejects_garbage() {
        let vars: HashMap<&str, &str> =
            [("JOBS_WORKER_COUNT", "8"), ("JOBS_DISPATCH_INTERVAL_MS", " 250 ")]
                .into_iter()
                .collect();
        let cfg = ManagerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.dispatch_interval(), Duration::from_millis(250));

        let err = ManagerConfig::from_lookup(|k| {
            (k == "JOBS_EVENT_BUFFER").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn sub_second_shutdown_timeout_survives() {
        let cfg = ManagerConfig::default().with_shutdown_timeout(Duration::from_millis(500));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn zero_workers_is_invalid() {
        let cfg = ManagerConfig::default().with_worker_count(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
