//! SurrealDB-backed implementation of the job `Storage` contract.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use job_core::{Job, JobEvent, JobFilter, JobId, JobStats, JobStatus, Storage, StorageError};

use crate::repositories::{EventRepository, JobRepository};
use crate::{Database, DbConfig, DbError, connect, init_schema};

/// Durable job store on top of a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealStorage {
    db: Database,
    jobs: JobRepository,
    events: EventRepository,
}

impl SurrealStorage {
    /// Connect and make sure the schema exists.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect(config).await?;
        Self::from_database(db).await
    }

    /// Wrap an existing connection.
    pub async fn from_database(db: Database) -> Result<Self, DbError> {
        init_schema(&db).await?;
        Ok(Self {
            jobs: JobRepository::new(db.clone()),
            events: EventRepository::new(db.clone()),
            db,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    pub fn events(&self) -> &EventRepository {
        &self.events
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, DbError> {
        let ids = self.jobs.expired_ids(older_than).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let count = ids.len() as u64;
        self.events.delete_for_jobs(ids.clone()).await?;
        self.jobs.delete_many(ids).await?;

        tracing::info!(count, "Removed expired jobs");
        Ok(count)
    }
}

impl Storage for SurrealStorage {
    fn save_job<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.jobs.create(job).await?;
            Ok(())
        })
    }

    fn get_job(&self, id: JobId) -> BoxFuture<'_, Result<Job, StorageError>> {
        Box::pin(async move { Ok(self.jobs.get(id).await?) })
    }

    fn update_job<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.jobs.update(job).await?;
            Ok(())
        })
    }

    fn delete_job(&self, id: JobId) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.events.delete_for_jobs(vec![id.to_string()]).await?;
            self.jobs.delete(id).await?;
            Ok(())
        })
    }

    fn list_jobs<'a>(
        &'a self,
        filter: &'a JobFilter,
    ) -> BoxFuture<'a, Result<Vec<Job>, StorageError>> {
        Box::pin(async move { Ok(self.jobs.list(filter).await?) })
    }

    fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move { Ok(self.jobs.update_status(id, status).await?) })
    }

    fn get_jobs_by_status(
        &self,
        status: JobStatus,
    ) -> BoxFuture<'_, Result<Vec<Job>, StorageError>> {
        Box::pin(async move { Ok(self.jobs.list_by_status(status).await?) })
    }

    fn get_job_stats<'a>(
        &'a self,
        filter: &'a JobFilter,
    ) -> BoxFuture<'a, Result<JobStats, StorageError>> {
        Box::pin(async move { Ok(self.jobs.stats(filter).await?) })
    }

    fn save_job_event<'a>(
        &'a self,
        event: &'a JobEvent,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move { Ok(self.events.create(event).await?) })
    }

    fn get_job_events(&self, id: JobId) -> BoxFuture<'_, Result<Vec<JobEvent>, StorageError>> {
        Box::pin(async move { Ok(self.events.list_for_job(id).await?) })
    }

    fn cleanup_old_jobs(
        &self,
        older_than: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StorageError>> {
        Box::pin(async move { Ok(self.cleanup(older_than).await?) })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.db.health().await.map_err(DbError::from)?;
            Ok(())
        })
    }
}
