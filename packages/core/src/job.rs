//! Job domain types for automation work items.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::JobError;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution priority. Higher values are dispatched first.
///
/// Any integer is accepted; the named levels are the ones clients are
/// expected to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(10);
    pub const CRITICAL: Priority = Priority(15);

    pub fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Priority::LOW => write!(f, "low"),
            Priority::NORMAL => write!(f, "normal"),
            Priority::HIGH => write!(f, "high"),
            Priority::CRITICAL => write!(f, "critical"),
            Priority(other) => write!(f, "{}", other),
        }
    }
}

/// Kind of automation work, used to route a job to its executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Configuration-management playbook run.
    Ansible,
    Provisioning,
    Deprovisioning,
}

impl JobType {
    pub const ALL: [JobType; 3] = [
        JobType::Ansible,
        JobType::Provisioning,
        JobType::Deprovisioning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Ansible => "ansible",
            JobType::Provisioning => "provisioning",
            JobType::Deprovisioning => "deprovisioning",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::Validation(format!("unsupported job type: {s}")))
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the ready queue.
    #[default]
    Queued,
    /// Waiting for its activation time.
    Scheduled,
    /// Held by a worker.
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Exceeded its execution timeout.
    Timeout,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Timeout,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    /// Check if the job is still waiting to be picked up.
    pub fn is_waiting(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Scheduled)
    }

    /// Check if a result can be read for this status.
    pub fn has_result(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| JobError::Validation(format!("unknown job status: {s}")))
    }
}

/// What an executor reports for a single attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Per-task counters such as `ok`, `changed`, `failed`.
    #[serde(default)]
    pub task_stats: BTreeMap<String, i64>,
    /// Per-host summary lines.
    #[serde(default)]
    pub host_stats: BTreeMap<String, String>,
}

impl ExecutionResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_task_stat(mut self, name: impl Into<String>, count: i64) -> Self {
        self.task_stats.insert(name.into(), count);
        self
    }

    pub fn with_host_stat(mut self, host: impl Into<String>, summary: impl Into<String>) -> Self {
        self.host_stats.insert(host.into(), summary.into());
        self
    }
}

/// Read view of a finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub task_stats: BTreeMap<String, i64>,
    #[serde(default)]
    pub host_stats: BTreeMap<String, String>,
}

/// Submission request. Unset fields take the manager's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Client-chosen id; generated when absent. It must be a ULID
    /// (26 Crockford base32 characters, e.g. `01HZX3J4Q6RW8N1V5C2T9KBMEA`) so
    /// ids stay sortable by creation time. Any other string is rejected
    /// with [`JobError::Validation`](crate::JobError::Validation).
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub job_type: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<JobId>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job_type: job_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_start_after(mut self, at: DateTime<Utc>) -> Self {
        self.start_after = Some(at);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay_secs: u64) -> Self {
        self.retry_delay_secs = Some(retry_delay_secs);
        self
    }
}

/// A unit of automation work tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub job_type: JobType,
    pub priority: Priority,
    pub status: JobStatus,
    /// Opaque input for the executor.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Recorded for consumers; not enforced by dispatch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<DateTime<Utc>>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
    pub retry_delay_secs: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    /// Create a new queued job with stock limits.
    pub fn new(name: impl Into<String>, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            job_type,
            priority: Priority::default(),
            status: JobStatus::Queued,
            payload,
            owner: None,
            description: None,
            tags: Vec::new(),
            depends_on: Vec::new(),
            scheduled_at: None,
            start_after: None,
            timeout_secs: 3600,
            max_retries: 3,
            retry_count: 0,
            retry_delay_secs: 300,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            exit_code: None,
            output: None,
            error_message: None,
        }
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the timeout for this job.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the max retries for this job.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the owning user.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Add tags to this job.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Defer this job until `at`.
    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The later of `scheduled_at` and `start_after`, if either is set.
    pub fn activation_time(&self) -> Option<DateTime<Utc>> {
        match (self.scheduled_at, self.start_after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Check if an explicit retry is allowed.
    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    /// Clear per-attempt fields ahead of another attempt.
    pub fn reset_for_retry(&mut self) {
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
        self.exit_code = None;
        self.output = None;
        self.error_message = None;
        self.retry_count = self.retry_count.saturating_add(1);
        self.status = JobStatus::Queued;
    }

    /// Record the outcome of an attempt that ran to completion.
    pub fn apply_outcome(&mut self, result: &ExecutionResult, completed_at: DateTime<Utc>) {
        self.status = if result.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.exit_code = Some(result.exit_code);
        self.output = (!result.output.is_empty()).then(|| result.output.clone());
        self.error_message = result.error.clone();
        self.finish(completed_at);
    }

    /// Mark the attempt finished at `at`, filling in the duration.
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        self.duration_ms = self
            .started_at
            .map(|started| (at - started).num_milliseconds().max(0) as u64);
    }

    /// Build the read view of this job's latest attempt.
    pub fn result(&self) -> JobResult {
        JobResult {
            job_id: self.id,
            status: self.status,
            success: self.status == JobStatus::Completed,
            exit_code: self.exit_code,
            output: self.output.clone(),
            error: self.error_message.clone(),
            duration_ms: self.duration_ms,
            started_at: self.started_at,
            completed_at: self.completed_at,
            task_stats: BTreeMap::new(),
            host_stats: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn priority_levels_order() {
        assert!(Priority::CRITICAL > Priority::HIGH);
        assert!(Priority::HIGH > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::LOW);
        assert_eq!(Priority::default(), Priority(5));
        assert_eq!(Priority(7).to_string(), "7");
        assert_eq!(Priority::HIGH.to_string(), "high");
    }

    #[test]
    fn job_type_parse() {
        assert_eq!("ansible".parse::<JobType>().unwrap(), JobType::Ansible);
        assert!(matches!(
            "shell".parse::<JobType>(),
            Err(JobError::Validation(_))
        ));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Timeout.is_terminal());
        assert!(!JobStatus::Scheduled.is_terminal());
    }

    #[test]
    fn retry_resets_attempt_fields() {
        let mut job = Job::new("deploy", JobType::Ansible, serde_json::Value::Null)
            .with_max_retries(2);
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.apply_outcome(&ExecutionResult::failed(2, "boom"), Utc::now());
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.is_retryable());

        job.reset_for_retry();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 1);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.exit_code.is_none());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn exhausted_job_is_not_retryable() {
        let mut job = Job::new("deploy", JobType::Ansible, serde_json::Value::Null)
            .with_max_retries(1);
        job.status = JobStatus::Failed;
        job.retry_count = 1;
        assert!(!job.is_retryable());

        job.retry_count = 0;
        job.status = JobStatus::Timeout;
        assert!(!job.is_retryable());
    }

    #[test]
    fn activation_time_takes_later_bound() {
        let now = Utc::now();
        let mut job = Job::new("deploy", JobType::Provisioning, serde_json::Value::Null);
        assert!(job.activation_time().is_none());

        job.scheduled_at = Some(now);
        job.start_after = Some(now + ChronoDuration::seconds(5));
        assert_eq!(job.activation_time(), job.start_after);
    }
}
