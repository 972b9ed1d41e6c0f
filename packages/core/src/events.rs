//! Lifecycle events for audit and real-time updates.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Job, JobError, JobId, JobStatus};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    Created,
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Retried,
}

impl JobEventType {
    pub const ALL: [JobEventType; 8] = [
        JobEventType::Created,
        JobEventType::Queued,
        JobEventType::Started,
        JobEventType::Progress,
        JobEventType::Completed,
        JobEventType::Failed,
        JobEventType::Cancelled,
        JobEventType::Retried,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventType::Created => "created",
            JobEventType::Queued => "queued",
            JobEventType::Started => "started",
            JobEventType::Progress => "progress",
            JobEventType::Completed => "completed",
            JobEventType::Failed => "failed",
            JobEventType::Cancelled => "cancelled",
            JobEventType::Retried => "retried",
        }
    }

    /// Events that close an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEventType::Completed | JobEventType::Failed | JobEventType::Cancelled
        )
    }
}

impl std::fmt::Display for JobEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobEventType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobEventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::Validation(format!("unknown event type: {s}")))
    }
}

/// An append-only record of something that happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: Ulid,
    pub job_id: JobId,
    pub event_type: JobEventType,
    /// Job status at the time the event was raised.
    pub status: JobStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Create an event snapshotting the job's current status.
    pub fn new(job: &Job, event_type: JobEventType, message: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            job_id: job.id,
            event_type,
            status: job.status,
            message: message.into(),
            data: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured data field.
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        if self.message.is_empty() {
            format!("Job {} {}", self.job_id, self.event_type)
        } else {
            format!("Job {} {}: {}", self.job_id, self.event_type, self.message)
        }
    }
}
