//! Contract for the component that actually runs a job's payload.

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use job_core::{ExecutionResult, Job, JobError, JobId, JobStatus};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors reported by an [`Executor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Execution failed: {0}")]
    Execution(String),
    #[error("No execution found for job {0}")]
    NotFound(JobId),
    #[error("Job {0} is not running")]
    NotRunning(JobId),
    #[error("Invalid job: {0}")]
    Validation(String),
}

impl From<ExecutorError> for JobError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Validation(msg) => JobError::Validation(msg),
            ExecutorError::NotFound(id) => JobError::NotFound(id),
            other => JobError::Execution(other.to_string()),
        }
    }
}

/// Runs job payloads on behalf of the worker pool.
///
/// `execute` must observe `cancel`; once it fires the worker waits only a
/// short grace period before abandoning the attempt.
pub trait Executor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        job: &'a Job,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ExecutionResult, ExecutorError>>;

    /// Status of an execution this executor knows about.
    fn status(&self, id: JobId) -> BoxFuture<'_, Result<JobStatus, ExecutorError>>;

    fn cancel(&self, id: JobId) -> BoxFuture<'_, Result<(), ExecutorError>>;

    /// Log lines of a running job. The stream ends when the job does.
    fn stream_logs(
        &self,
        id: JobId,
    ) -> BoxFuture<'_, Result<BoxStream<'static, String>, ExecutorError>>;

    fn is_healthy(&self) -> BoxFuture<'_, bool>;

    /// Executor-specific payload checks, run at submission.
    fn validate_job(&self, job: &Job) -> Result<(), ExecutorError>;
}
