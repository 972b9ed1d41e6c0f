//! Persistence contract for jobs and their events.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;

use crate::{Job, JobEvent, JobFilter, JobId, JobStats, JobStatus, StorageError};

/// Durable job store.
///
/// Implementations must be safe to share across tasks. `get_job` and
/// `update_job` report [`StorageError::NotFound`] for unknown ids, and
/// `save_job` reports [`StorageError::Duplicate`] for an existing id.
pub trait Storage: Send + Sync + 'static {
    fn save_job<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), StorageError>>;

    fn get_job(&self, id: JobId) -> BoxFuture<'_, Result<Job, StorageError>>;

    fn update_job<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Delete a job together with its events.
    fn delete_job(&self, id: JobId) -> BoxFuture<'_, Result<(), StorageError>>;

    /// List jobs newest first.
    fn list_jobs<'a>(
        &'a self,
        filter: &'a JobFilter,
    ) -> BoxFuture<'a, Result<Vec<Job>, StorageError>>;

    /// Change only the status field.
    fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> BoxFuture<'_, Result<(), StorageError>>;

    fn get_jobs_by_status(&self, status: JobStatus)
    -> BoxFuture<'_, Result<Vec<Job>, StorageError>>;

    fn get_job_stats<'a>(
        &'a self,
        filter: &'a JobFilter,
    ) -> BoxFuture<'a, Result<JobStats, StorageError>>;

    fn save_job_event<'a>(&'a self, event: &'a JobEvent)
    -> BoxFuture<'a, Result<(), StorageError>>;

    /// Events for one job in timestamp order.
    fn get_job_events(&self, id: JobId) -> BoxFuture<'_, Result<Vec<JobEvent>, StorageError>>;

    /// Delete terminal jobs created before `older_than`, returning how many.
    fn cleanup_old_jobs(
        &self,
        older_than: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StorageError>>;

    fn ping(&self) -> BoxFuture<'_, Result<(), StorageError>>;
}
