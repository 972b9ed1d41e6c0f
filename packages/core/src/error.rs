//! Error taxonomy shared by every component.

use thiserror::Error;

use crate::{JobId, JobStatus};

/// Errors surfaced to callers of the job manager.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job: {0}")]
    Validation(String),
    #[error("Job not found: {0}")]
    NotFound(JobId),
    #[error("Job {id} cannot be retried (status {status}, {retry_count}/{max_retries} retries used)")]
    NotRetryable {
        id: JobId,
        status: JobStatus,
        retry_count: u32,
        max_retries: u32,
    },
    #[error("Job {id} has no result yet (status {status})")]
    NotReady { id: JobId, status: JobStatus },
    #[error("Job {id} cannot be cancelled (status {status})")]
    NotCancellable { id: JobId, status: JobStatus },
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Timed out waiting for job {0}")]
    DeadlineExceeded(JobId),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Shutdown timed out")]
    ShutdownTimeout,
    #[error("Already running")]
    AlreadyRunning,
    #[error("Not running")]
    NotRunning,
    #[error("Unhealthy: {0}")]
    Unhealthy(String),
}

/// Errors from a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Duplicate(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors from the job queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is empty")]
    Empty,
    #[error("Job not in queue: {0}")]
    NotFound(JobId),
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
