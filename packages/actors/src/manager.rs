//! Job manager: the public entry point tying storage, queue, workers,
//! events and the executor together.
//!
//! ```ignore
//! let storage = Arc::new(db::init(DbConfig::memory()).await?);
//! let executor = Arc::new(HandlerExecutor::new(handlers));
//! let manager = JobManager::with_defaults(ManagerConfig::default(), storage, executor).await?;
//!
//! manager.start().await?;
//! let job = manager.submit_job(JobRequest::new("site.yml", "ansible")).await?;
//! let result = manager.wait_for_job(job.id, Duration::from_secs(60)).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::stream::BoxStream;
use job_core::{
    Job, JobError, JobEvent, JobEventType, JobFilter, JobId, JobRequest, JobResult, JobStats,
    JobStatus, JobType, QueueError, Storage, StorageError,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::active::{ActiveJobs, StopOutcome, StopReason};
use crate::config::ManagerConfig;
use crate::event_bus::{
    EventBus, EventBusStats, MemoryEventBus, Subscription, SubscriptionId, emit,
};
use crate::executor::Executor;
use crate::pool::{DefaultWorkerPool, PoolConfig, PoolStats, WorkerPool};
use crate::queue_actor::{JobQueue, QueueHandle};
use crate::worker_actor::WorkerContext;

struct BackgroundTasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Lifetime counters of a [`JobManager`], with pool and bus snapshots.
///
/// Completions, failures and run times are counted by the workers that
/// recorded them; timed-out jobs are only counted in `jobs_timed_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_timed_out: u64,
    pub jobs_retried: u64,
    pub average_runtime_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_job_at: Option<DateTime<Utc>>,
    pub pool: PoolStats,
    pub events: EventBusStats,
}

#[derive(Debug, Default)]
struct ManagerCounters {
    submitted: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
    retried: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_job_at: Mutex<Option<DateTime<Utc>>>,
}

impl ManagerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn stamp(cell: &Mutex<Option<DateTime<Utc>>>, at: DateTime<Utc>) {
        *cell.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    fn read(cell: &Mutex<Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
        *cell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ManagerInner {
    config: ManagerConfig,
    storage: Arc<dyn Storage>,
    queue: Arc<dyn JobQueue>,
    pool: Arc<dyn WorkerPool>,
    bus: Arc<dyn EventBus>,
    executor: Arc<dyn Executor>,
    running: AtomicBool,
    counters: ManagerCounters,
    tasks: tokio::sync::Mutex<Option<BackgroundTasks>>,
    /// Queue actor spawned by [`JobManager::with_defaults`].
    owned_queue: Option<QueueHandle>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(queue) = &self.owned_queue {
            queue.shutdown();
        }
    }
}

/// Orchestrates the job lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    /// Assemble a manager from existing components.
    ///
    /// `pool` must dispatch from `queue` and publish on `bus`.
    pub fn new(
        config: ManagerConfig,
        storage: Arc<dyn Storage>,
        queue: Arc<dyn JobQueue>,
        pool: Arc<dyn WorkerPool>,
        bus: Arc<dyn EventBus>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, JobError> {
        config
            .validate()
            .map_err(|e| JobError::Validation(e.to_string()))?;
        Ok(Self::assemble(config, storage, queue, pool, bus, executor, None))
    }

    /// Build a manager with a queue actor, an in-memory event bus and a
    /// worker pool of `config.worker_count` workers.
    pub async fn with_defaults(
        config: ManagerConfig,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, JobError> {
        config
            .validate()
            .map_err(|e| JobError::Validation(e.to_string()))?;

        let (queue, _) = QueueHandle::spawn(config.queue_call_timeout())
            .await
            .map_err(|e| JobError::Execution(format!("failed to spawn queue: {e}")))?;
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new(config.event_buffer));
        let shared_queue: Arc<dyn JobQueue> = Arc::new(queue.clone());

        let ctx = WorkerContext {
            storage: storage.clone(),
            bus: bus.clone(),
            executor: executor.clone(),
            active: Arc::new(ActiveJobs::new()),
            cancel_grace: config.cancel_grace(),
        };
        let pool_config = PoolConfig {
            dispatch_interval: config.dispatch_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        };
        let pool = Arc::new(DefaultWorkerPool::new(pool_config, shared_queue.clone(), ctx));

        Ok(Self::assemble(
            config,
            storage,
            shared_queue,
            pool,
            bus,
            executor,
            Some(queue),
        ))
    }

    fn assemble(
        config: ManagerConfig,
        storage: Arc<dyn Storage>,
        queue: Arc<dyn JobQueue>,
        pool: Arc<dyn WorkerPool>,
        bus: Arc<dyn EventBus>,
        executor: Arc<dyn Executor>,
        owned_queue: Option<QueueHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                storage,
                queue,
                pool,
                bus,
                executor,
                running: AtomicBool::new(false),
                counters: ManagerCounters::default(),
                tasks: tokio::sync::Mutex::new(None),
                owned_queue,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// The worker pool, for resizing at runtime.
    pub fn pool(&self) -> &dyn WorkerPool {
        self.inner.pool.as_ref()
    }

    async fn load(&self, id: JobId) -> Result<Job, JobError> {
        self.inner.storage.get_job(id).await.map_err(|e| match e {
            StorageError::NotFound(_) => JobError::NotFound(id),
            other => JobError::Storage(other),
        })
    }

    async fn emit(&self, event: JobEvent) {
        emit(self.inner.storage.as_ref(), self.inner.bus.as_ref(), event).await;
    }

    fn build_job(&self, request: JobRequest) -> Result<Job, JobError> {
        let config = &self.inner.config;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(JobError::Validation("job name is required".into()));
        }
        let job_type: JobType = request.job_type.parse()?;

        let timeout_secs = match request.timeout_secs {
            None | Some(0) => config.default_job_timeout_secs,
            Some(secs) => secs,
        };
        if timeout_secs > config.max_job_timeout_secs {
            return Err(JobError::Validation(format!(
                "timeout {timeout_secs}s exceeds the maximum of {}s",
                config.max_job_timeout_secs
            )));
        }

        let mut job = Job::new(name, job_type, request.payload)
            .with_timeout(timeout_secs)
            .with_max_retries(request.max_retries.unwrap_or(config.default_max_retries))
            .with_tags(request.tags);

        if let Some(raw) = request.id.as_deref() {
            job.id = JobId::parse(raw)
                .map_err(|e| JobError::Validation(format!("invalid job id {raw:?}: {e}")))?;
        }
        job.priority = request.priority.unwrap_or_default();
        job.owner = request.owner;
        job.description = request.description;
        job.depends_on = request.depends_on;
        job.scheduled_at = request.scheduled_at;
        job.start_after = request.start_after;
        job.retry_delay_secs = match request.retry_delay_secs {
            None | Some(0) => config.default_retry_delay_secs,
            Some(secs) => secs,
        };

        Ok(job)
    }

    /// Validate, persist and enqueue a new job.
    pub async fn submit_job(&self, request: JobRequest) -> Result<Job, JobError> {
        let mut job = self.build_job(request)?;
        self.inner.executor.validate_job(&job)?;

        let activate_at = job.activation_time().filter(|at| *at > Utc::now());
        if activate_at.is_some() {
            job.status = JobStatus::Scheduled;
        }

        self.inner.storage.save_job(&job).await.map_err(|e| match e {
            StorageError::Duplicate(_) => {
                JobError::Validation(format!("job {} already exists", job.id))
            }
            other => JobError::Storage(other),
        })?;

        // Announce before the job becomes visible to workers so that
        // `created` always precedes `started`.
        self.emit(
            JobEvent::new(&job, JobEventType::Created, format!("Job '{}' created", job.name))
                .with_data("job_type", serde_json::json!(job.job_type))
                .with_data("priority", serde_json::json!(job.priority)),
        )
        .await;

        let enqueued = match activate_at {
            Some(at) => self.inner.queue.enqueue_at(job.clone(), at).await,
            None => self.inner.queue.enqueue(job.clone()).await,
        };
        if let Err(e) = enqueued {
            tracing::warn!(job_id = %job.id, error = %e, "Enqueue failed, discarding job");
            if let Err(e) = self.inner.storage.delete_job(job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to discard unqueued job");
            }
            return Err(e.into());
        }

        let counters = &self.inner.counters;
        ManagerCounters::bump(&counters.submitted);
        ManagerCounters::stamp(&counters.last_job_at, Utc::now());
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            status = %job.status,
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, JobError> {
        self.load(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        Ok(self.inner.storage.list_jobs(filter).await?)
    }

    /// Cancel a waiting or running job.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job, JobError> {
        let job = self.load(id).await?;
        if job.status.is_terminal() {
            return Err(JobError::NotCancellable {
                id,
                status: job.status,
            });
        }

        match self.inner.pool.signal_stop(id, StopReason::Cancelled) {
            StopOutcome::Signalled => {
                if let Err(e) = self.inner.executor.cancel(id).await {
                    tracing::debug!(job_id = %id, error = %e, "Executor cancel ignored");
                }
            }
            StopOutcome::NotActive if job.status.is_waiting() => {
                match self.inner.queue.remove_job(id).await {
                    Ok(()) => self.inner.pool.clear_stop(id),
                    // Already dequeued; the tombstone stops the worker.
                    Err(QueueError::NotFound(_)) => {}
                    Err(e) => {
                        self.inner.pool.clear_stop(id);
                        return Err(e.into());
                    }
                }
            }
            StopOutcome::NotActive => self.inner.pool.clear_stop(id),
            StopOutcome::Finishing | StopOutcome::AlreadyStopped(_) => {
                return Err(JobError::NotCancellable {
                    id,
                    status: job.status,
                });
            }
        }

        let mut job = self.load(id).await?;
        if job.status.is_terminal() && job.status != JobStatus::Cancelled {
            self.inner.pool.clear_stop(id);
            return Err(JobError::NotCancellable {
                id,
                status: job.status,
            });
        }

        job.status = JobStatus::Cancelled;
        if job.completed_at.is_none() {
            job.finish(Utc::now());
        }
        self.inner.storage.update_job(&job).await?;

        ManagerCounters::bump(&self.inner.counters.cancelled);
        tracing::info!(job_id = %id, "Job cancelled");
        self.emit(JobEvent::new(
            &job,
            JobEventType::Cancelled,
            format!("Job '{}' cancelled", job.name),
        ))
        .await;
        Ok(job)
    }

    /// Re-queue a failed job that has retries left.
    pub async fn retry_job(&self, id: JobId) -> Result<Job, JobError> {
        let mut job = self.load(id).await?;
        if !job.is_retryable() {
            return Err(JobError::NotRetryable {
                id,
                status: job.status,
                retry_count: job.retry_count,
                max_retries: job.max_retries,
            });
        }

        let previous = job.clone();
        job.reset_for_retry();
        self.inner.storage.update_job(&job).await?;

        // Only announce a retry that is actually queued.
        if let Err(e) = self.inner.queue.enqueue(job.clone()).await {
            tracing::warn!(job_id = %id, error = %e, "Enqueue failed, restoring failed job");
            if let Err(e) = self.inner.storage.update_job(&previous).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to restore job after enqueue failure");
            }
            return Err(e.into());
        }

        self.emit(
            JobEvent::new(
                &job,
                JobEventType::Retried,
                format!(
                    "Job '{}' retried (attempt {}/{})",
                    job.name, job.retry_count, job.max_retries
                ),
            )
            .with_data("retry_count", serde_json::json!(job.retry_count))
            .with_data("max_retries", serde_json::json!(job.max_retries)),
        )
        .await;

        ManagerCounters::bump(&self.inner.counters.retried);
        tracing::info!(job_id = %id, retry_count = job.retry_count, "Job retried");
        Ok(job)
    }

    /// Stored status; for a running job a terminal status reported by the
    /// executor wins.
    pub async fn get_job_status(&self, id: JobId) -> Result<JobStatus, JobError> {
        let job = self.load(id).await?;
        if job.status == JobStatus::Running {
            if let Ok(live) = self.inner.executor.status(id).await {
                if live.is_terminal() {
                    return Ok(live);
                }
            }
        }
        Ok(job.status)
    }

    /// Result of a completed or failed job.
    pub async fn get_job_result(&self, id: JobId) -> Result<JobResult, JobError> {
        let job = self.load(id).await?;
        if !job.status.has_result() {
            return Err(JobError::NotReady {
                id,
                status: job.status,
            });
        }
        Ok(self.result_of(&job).await)
    }

    /// Build the result view, pulling task and host stats from the last
    /// terminal event.
    async fn result_of(&self, job: &Job) -> JobResult {
        let mut result = job.result();
        if !job.status.has_result() {
            return result;
        }

        let events = match self.inner.storage.get_job_events(job.id).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job events unavailable");
                return result;
            }
        };

        let last = events.iter().rev().find(|e| {
            matches!(e.event_type, JobEventType::Completed | JobEventType::Failed)
        });
        if let Some(event) = last {
            if let Some(stats) = event.data.get("task_stats") {
                result.task_stats =
                    serde_json::from_value::<BTreeMap<String, i64>>(stats.clone()).unwrap_or_default();
            }
            if let Some(stats) = event.data.get("host_stats") {
                result.host_stats = serde_json::from_value::<BTreeMap<String, String>>(stats.clone())
                    .unwrap_or_default();
            }
        }
        result
    }

    /// Live log lines of a running job.
    pub async fn stream_job_logs(&self, id: JobId) -> Result<BoxStream<'static, String>, JobError> {
        self.load(id).await?;
        Ok(self.inner.executor.stream_logs(id).await?)
    }

    /// Wait until the job reaches a terminal status.
    pub async fn wait_for_job(&self, id: JobId, timeout: Duration) -> Result<JobResult, JobError> {
        let mut subscription = self.inner.bus.subscribe_to_job(id);
        let subscription_id = subscription.id();

        let outcome = tokio::time::timeout(timeout, async {
            let job = self.load(id).await?;
            if job.status.is_terminal() {
                return Ok(self.result_of(&job).await);
            }

            loop {
                match subscription.recv().await {
                    Some(event) if event.event_type.is_terminal() => {
                        let job = self.load(id).await?;
                        if job.status.is_terminal() {
                            return Ok(self.result_of(&job).await);
                        }
                    }
                    Some(_) => {}
                    None => {
                        let job = self.load(id).await?;
                        return if job.status.is_terminal() {
                            Ok(self.result_of(&job).await)
                        } else {
                            Err(JobError::NotRunning)
                        };
                    }
                }
            }
        })
        .await;

        self.inner.bus.unsubscribe(subscription_id);
        outcome.unwrap_or(Err(JobError::DeadlineExceeded(id)))
    }

    /// Subscribe to events of the given types; an empty slice means all.
    pub fn subscribe(&self, types: &[JobEventType]) -> Subscription {
        self.inner.bus.subscribe(types)
    }

    pub fn subscribe_to_job(&self, id: JobId) -> Subscription {
        self.inner.bus.subscribe_to_job(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.bus.unsubscribe(id);
    }

    pub async fn get_stats(&self, filter: &JobFilter) -> Result<JobStats, JobError> {
        Ok(self.inner.storage.get_job_stats(filter).await?)
    }

    pub async fn get_job_events(&self, id: JobId) -> Result<Vec<JobEvent>, JobError> {
        Ok(self.inner.storage.get_job_events(id).await?)
    }

    /// In-process counters, as opposed to [`get_stats`](Self::get_stats)
    /// which counts stored jobs.
    pub async fn manager_stats(&self) -> ManagerStats {
        let counters = &self.inner.counters;
        let pool = self.inner.pool.stats().await;
        ManagerStats {
            jobs_submitted: counters.submitted.load(Ordering::Relaxed),
            jobs_completed: pool.jobs_completed,
            jobs_failed: pool.jobs_failed,
            jobs_cancelled: counters.cancelled.load(Ordering::Relaxed),
            jobs_timed_out: counters.timed_out.load(Ordering::Relaxed),
            jobs_retried: counters.retried.load(Ordering::Relaxed),
            average_runtime_ms: pool.average_runtime_ms,
            started_at: ManagerCounters::read(&counters.started_at),
            last_job_at: ManagerCounters::read(&counters.last_job_at),
            events: self.inner.bus.stats(),
            pool,
        }
    }

    /// Delete terminal jobs created more than `older_than` ago.
    pub async fn cleanup_jobs(&self, older_than: Duration) -> Result<u64, JobError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| JobError::Validation(format!("retention out of range: {e}")))?;
        let removed = self.inner.storage.cleanup_old_jobs(Utc::now() - age).await?;
        if removed > 0 {
            tracing::info!(removed, "Cleaned up old jobs");
        }
        Ok(removed)
    }

    /// Start the worker pool and the background loops.
    pub async fn start(&self) -> Result<(), JobError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(JobError::AlreadyRunning);
        }

        if let Err(e) = self.inner.pool.start(self.inner.config.worker_count).await {
            self.inner.running.store(false, Ordering::Release);
            return Err(e.into());
        }

        let shutdown = CancellationToken::new();
        let handles = vec![
            tokio::spawn(self.clone().cleanup_loop(shutdown.clone())),
            tokio::spawn(self.clone().timeout_loop(shutdown.clone())),
        ];
        *self.inner.tasks.lock().await = Some(BackgroundTasks { shutdown, handles });
        ManagerCounters::stamp(&self.inner.counters.started_at, Utc::now());

        tracing::info!(workers = self.inner.config.worker_count, "Job manager started");
        Ok(())
    }

    /// Stop the loops and the pool, then close the event bus. Subscriptions
    /// end and new ones start closed.
    pub async fn stop(&self) -> Result<(), JobError> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Err(JobError::NotRunning);
        }

        tracing::info!("Stopping job manager");
        if let Some(tasks) = self.inner.tasks.lock().await.take() {
            tasks.shutdown.cancel();
            join_all(tasks.handles).await;
        }

        let stopped = self.inner.pool.stop().await;
        self.inner.bus.close();
        stopped?;

        tracing::info!("Job manager stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// First failing dependency, if any.
    pub async fn health(&self) -> Result<(), JobError> {
        self.inner
            .storage
            .ping()
            .await
            .map_err(|e| JobError::Unhealthy(format!("storage: {e}")))?;
        self.inner
            .queue
            .ping()
            .await
            .map_err(|e| JobError::Unhealthy(format!("queue: {e}")))?;
        if !self.inner.executor.is_healthy().await {
            return Err(JobError::Unhealthy("executor reports unhealthy".into()));
        }
        if self.is_running() && !self.inner.pool.is_healthy() {
            return Err(JobError::Unhealthy(format!(
                "worker pool: {} of {} workers alive",
                self.inner.pool.worker_count(),
                self.inner.config.worker_count
            )));
        }
        Ok(())
    }

    async fn cleanup_loop(self, shutdown: CancellationToken) {
        let period = self.inner.config.cleanup_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.cleanup_jobs(self.inner.config.job_retention()).await {
                        tracing::warn!(error = %e, "Job cleanup failed");
                    }
                }
            }
        }
        tracing::debug!("Cleanup loop stopped");
    }

    async fn timeout_loop(self, shutdown: CancellationToken) {
        let period = self.inner.config.timeout_check_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.check_timeouts().await,
            }
        }
        tracing::debug!("Timeout checker stopped");
    }

    /// Time out every running job past its limit.
    async fn check_timeouts(&self) {
        let running = match self.inner.storage.get_jobs_by_status(JobStatus::Running).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Timeout check could not list running jobs");
                return;
            }
        };

        let now = Utc::now();
        for job in running {
            let Some(started_at) = job.started_at else {
                continue;
            };
            let elapsed = (now - started_at).to_std().unwrap_or_default();
            if elapsed <= job.timeout() {
                continue;
            }

            let signalled = match self.inner.pool.signal_stop(job.id, StopReason::TimedOut) {
                StopOutcome::Finishing | StopOutcome::AlreadyStopped(_) => continue,
                StopOutcome::Signalled => {
                    if let Err(e) = self.inner.executor.cancel(job.id).await {
                        tracing::debug!(job_id = %job.id, error = %e, "Executor cancel ignored");
                    }
                    true
                }
                StopOutcome::NotActive => {
                    self.inner.pool.clear_stop(job.id);
                    false
                }
            };

            let mut job = match self.load(job.id).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to reload timed out job");
                    continue;
                }
            };
            // The worker may already have repaired the record after its grace.
            let repaired = signalled && job.status == JobStatus::Timeout;
            if job.status != JobStatus::Running && !repaired {
                continue;
            }

            job.status = JobStatus::Timeout;
            if job.completed_at.is_none() {
                job.finish(now);
            }
            job.error_message = Some(format!("timed out after {}s", job.timeout_secs));
            if let Err(e) = self.inner.storage.update_job(&job).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to persist timeout");
            }

            ManagerCounters::bump(&self.inner.counters.timed_out);
            tracing::warn!(job_id = %job.id, timeout_secs = job.timeout_secs, "Job timed out");
            self.emit(
                JobEvent::new(
                    &job,
                    JobEventType::Failed,
                    format!("Job '{}' timed out", job.name),
                )
                .with_data("reason", serde_json::json!("timeout"))
                .with_data("timeout", serde_json::json!(format!("{}s", job.timeout_secs))),
            )
            .await;
        }
    }
}
