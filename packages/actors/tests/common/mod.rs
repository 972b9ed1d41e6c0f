#![allow(dead_code)]

use std::error::Error;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{FnHandler, HandlerExecutor, JobContext, JobHandler, JobHandlerRegistry, JobManager, ManagerConfig};
use chrono::{DateTime, Utc};
use db::DbConfig;
use futures_util::future::BoxFuture;
use job_core::{
    ExecutionResult, Job, JobEvent, JobFilter, JobId, JobStats, JobStatus, JobType, Storage,
    StorageError,
};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Short intervals so scenarios finish in well under a second.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_worker_count(2)
        .with_dispatch_interval(Duration::from_millis(10))
        .with_timeout_check_interval(Duration::from_millis(50))
        .with_cancel_grace(Duration::from_millis(100))
        .with_shutdown_timeout(Duration::from_secs(5))
}

/// Manager over a fresh in-memory store and the given handlers.
pub async fn setup_manager(
    config: ManagerConfig,
    handlers: JobHandlerRegistry,
) -> Result<(JobManager, Arc<HandlerExecutor>), Box<dyn Error>> {
    let storage = Arc::new(db::init(DbConfig::memory()).await?);
    setup_manager_with(config, handlers, storage).await
}

/// Manager over the given store.
pub async fn setup_manager_with(
    config: ManagerConfig,
    handlers: JobHandlerRegistry,
    storage: Arc<dyn Storage>,
) -> Result<(JobManager, Arc<HandlerExecutor>), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let executor = Arc::new(HandlerExecutor::new(handlers));
    let manager = JobManager::with_defaults(config, storage, executor.clone()).await?;
    Ok((manager, executor))
}

/// Succeeds with a small play recap.
pub fn succeeding(job_type: JobType) -> impl JobHandler {
    FnHandler::new(job_type, |ctx: JobContext| {
        Box::pin(async move {
            Ok(ExecutionResult::succeeded(format!("ran {}", ctx.job.name))
                .with_task_stat("ok", 3)
                .with_task_stat("changed", 1)
                .with_host_stat("web-1", "ok=3 changed=1"))
        })
    })
}

/// Always fails with `boom`.
pub fn failing(job_type: JobType) -> impl JobHandler {
    FnHandler::new(job_type, |_ctx: JobContext| {
        Box::pin(async move { Err("boom".to_string()) })
    })
}

/// Never returns and ignores cancellation.
pub fn hanging(job_type: JobType) -> impl JobHandler {
    FnHandler::new(job_type, |_ctx: JobContext| {
        Box::pin(async move { std::future::pending().await })
    })
}

/// Records job names in execution order.
pub fn recording(job_type: JobType, seen: Arc<Mutex<Vec<String>>>) -> impl JobHandler {
    FnHandler::new(job_type, move |ctx: JobContext| {
        let seen = seen.clone();
        Box::pin(async move {
            seen.lock().unwrap().push(ctx.job.name.clone());
            Ok(ExecutionResult::succeeded(""))
        })
    })
}

/// Poll `check` until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Store whose writes of `running` records land late, widening the window
/// between a worker claiming a job and announcing it.
pub struct SlowStartStorage {
    inner: Arc<dyn Storage>,
    delay: Duration,
}

impl SlowStartStorage {
    pub async fn memory(delay: Duration) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            inner: Arc::new(db::init(DbConfig::memory()).await?),
            delay,
        })
    }
}

impl Storage for SlowStartStorage {
    fn save_job<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), StorageError>> {
        self.inner.save_job(job)
    }

    fn get_job(&self, id: JobId) -> BoxFuture<'_, Result<Job, StorageError>> {
        self.inner.get_job(id)
    }

    fn update_job<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            if job.status == JobStatus::Running {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.update_job(job).await
        })
    }

    fn delete_job(&self, id: JobId) -> BoxFuture<'_, Result<(), StorageError>> {
        self.inner.delete_job(id)
    }

    fn list_jobs<'a>(
        &'a self,
        filter: &'a JobFilter,
    ) -> BoxFuture<'a, Result<Vec<Job>, StorageError>> {
        self.inner.list_jobs(filter)
    }

    fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        self.inner.update_job_status(id, status)
    }

    fn get_jobs_by_status(&self, status: JobStatus)
    -> BoxFuture<'_, Result<Vec<Job>, StorageError>> {
        self.inner.get_jobs_by_status(status)
    }

    fn get_job_stats<'a>(
        &'a self,
        filter: &'a JobFilter,
    ) -> BoxFuture<'a, Result<JobStats, StorageError>> {
        self.inner.get_job_stats(filter)
    }

    fn save_job_event<'a>(&'a self, event: &'a JobEvent)
    -> BoxFuture<'a, Result<(), StorageError>> {
        self.inner.save_job_event(event)
    }

    fn get_job_events(&self, id: JobId) -> BoxFuture<'_, Result<Vec<JobEvent>, StorageError>> {
        self.inner.get_job_events(id)
    }

    fn cleanup_old_jobs(
        &self,
        older_than: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StorageError>> {
        self.inner.cleanup_old_jobs(older_than)
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        self.inner.ping()
    }
}
