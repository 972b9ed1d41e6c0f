//! Read-side query and aggregate types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobStatus, JobType, Priority};

/// Filter options for listing jobs. Empty sets match everything.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    #[serde(default)]
    pub job_types: Vec<JobType>,
    pub owner: Option<String>,
    pub tag: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_types.push(job_type);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Aggregate job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub queued: u64,
    pub scheduled: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timeout: u64,
}

impl JobStats {
    /// Add `count` jobs in `status` to the totals.
    pub fn record(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Scheduled => &mut self.scheduled,
            JobStatus::Running => &mut self.running,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
            JobStatus::Timeout => &mut self.timeout,
        };
        *slot += count;
    }
}
