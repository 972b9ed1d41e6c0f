//! Worker pool: a set of worker actors fed by a periodic dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};
use job_core::{JobError, JobId, QueueError};
use ractor::{Actor, ActorRef};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::active::{ActiveJobs, StopOutcome, StopReason};
use crate::messages::WorkerMessage;
use crate::queue_actor::JobQueue;
use crate::worker_actor::{
    WorkerActor, WorkerArgs, WorkerContext, WorkerCounters, WorkerPhase, WorkerSlot,
};

/// Worker pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool already running")]
    AlreadyRunning,
    #[error("Worker pool not running")]
    NotRunning,
    #[error("Workers did not stop within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("No workers to remove")]
    NoWorkers,
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl From<PoolError> for JobError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AlreadyRunning => JobError::AlreadyRunning,
            PoolError::NotRunning => JobError::NotRunning,
            PoolError::ShutdownTimeout(_) => JobError::ShutdownTimeout,
            PoolError::InvalidConfig(msg) => JobError::Validation(msg),
            other => JobError::Execution(other.to_string()),
        }
    }
}

/// Bounded set of concurrent workers.
pub trait WorkerPool: Send + Sync + 'static {
    /// Spawn `workers` workers and begin dispatching.
    fn start(&self, workers: usize) -> BoxFuture<'_, Result<(), PoolError>>;

    /// Stop dispatching and wait for in-flight jobs to finish.
    fn stop(&self) -> BoxFuture<'_, Result<(), PoolError>>;

    fn add_worker(&self) -> BoxFuture<'_, Result<(), PoolError>>;

    /// Retire one worker. It finishes its current job first.
    fn remove_worker(&self) -> Result<(), PoolError>;

    fn worker_count(&self) -> usize;

    /// Jobs currently held by workers.
    fn active_jobs(&self) -> usize;

    fn queue_size(&self) -> BoxFuture<'_, usize>;

    fn is_healthy(&self) -> bool;

    fn is_running(&self) -> bool;

    /// Stop a job wherever it is; see [`ActiveJobs::stop`].
    fn signal_stop(&self, id: JobId, reason: StopReason) -> StopOutcome;

    /// Forget a stop for a job no worker will see.
    fn clear_stop(&self, id: JobId);

    fn stats(&self) -> BoxFuture<'_, PoolStats>;
}

/// Point-in-time view of a [`WorkerPool`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub worker_count: usize,
    pub target_workers: usize,
    pub idle_workers: usize,
    /// Removed workers still finishing a job.
    pub retiring_workers: usize,
    pub active_jobs: usize,
    pub queue_size: usize,
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub average_runtime_ms: Option<u64>,
    pub is_healthy: bool,
}

/// Timing knobs for [`DefaultWorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dispatch_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

struct WorkerEntry {
    id: String,
    actor: ActorRef<WorkerMessage>,
    handle: JoinHandle<()>,
    slot: Arc<WorkerSlot>,
}

#[derive(Default)]
struct PoolState {
    target: usize,
    next_id: u64,
    workers: Vec<WorkerEntry>,
    /// Removed from `workers` but possibly still running a job.
    retiring: Vec<WorkerEntry>,
    shutdown: Option<CancellationToken>,
    dispatcher: Option<JoinHandle<()>>,
}

struct PoolShared {
    config: PoolConfig,
    queue: Arc<dyn JobQueue>,
    ctx: Arc<WorkerContext>,
    counters: Arc<WorkerCounters>,
    running: AtomicBool,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn spawn_worker(&self) -> Result<(), PoolError> {
        let worker_id = {
            let mut state = self.lock();
            state.next_id += 1;
            format!("worker-{}", state.next_id)
        };

        let slot = Arc::new(WorkerSlot::default());
        let args = WorkerArgs {
            worker_id: worker_id.clone(),
            slot: slot.clone(),
            ctx: self.ctx.clone(),
            counters: self.counters.clone(),
        };

        let (actor, handle) = Actor::spawn(None, WorkerActor, args)
            .await
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        self.lock().workers.push(WorkerEntry {
            id: worker_id,
            actor,
            handle,
            slot,
        });
        Ok(())
    }

    /// Hand one job to each idle worker until the queue runs dry.
    async fn dispatch(&self) {
        let idle: Vec<(String, ActorRef<WorkerMessage>, Arc<WorkerSlot>)> = self
            .lock()
            .workers
            .iter()
            .filter(|w| w.slot.phase() == WorkerPhase::Idle)
            .map(|w| (w.id.clone(), w.actor.clone(), w.slot.clone()))
            .collect();

        for (worker_id, actor, slot) in idle {
            if !slot.try_assign() {
                continue;
            }

            let job = match self.queue.dequeue().await {
                Ok(job) => job,
                Err(QueueError::Empty) => {
                    slot.unassign();
                    break;
                }
                Err(e) => {
                    slot.unassign();
                    tracing::warn!(error = %e, "Dispatcher could not dequeue");
                    break;
                }
            };

            tracing::debug!(job_id = %job.id, worker_id = %worker_id, "Dispatching job");
            if let Err(e) = actor.send_message(WorkerMessage::ProcessJob {
                job: Box::new(job.clone()),
            }) {
                slot.unassign();
                tracing::warn!(job_id = %job.id, worker_id = %worker_id, error = %e, "Worker unreachable, requeueing job");
                if let Err(e) = self.queue.enqueue(job).await {
                    tracing::warn!(error = %e, "Failed to requeue job");
                }
            }
        }
    }
}

/// [`WorkerPool`] built from [`WorkerActor`]s.
#[derive(Clone)]
pub struct DefaultWorkerPool {
    shared: Arc<PoolShared>,
}

impl DefaultWorkerPool {
    pub fn new(config: PoolConfig, queue: Arc<dyn JobQueue>, ctx: WorkerContext) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                queue,
                ctx: Arc::new(ctx),
                counters: Arc::new(WorkerCounters::default()),
                running: AtomicBool::new(false),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    fn active(&self) -> &ActiveJobs {
        &self.shared.ctx.active
    }
}

impl WorkerPool for DefaultWorkerPool {
    fn start(&self, workers: usize) -> BoxFuture<'_, Result<(), PoolError>> {
        Box::pin(async move {
            let shared = &self.shared;
            if shared.config.dispatch_interval.is_zero() {
                return Err(PoolError::InvalidConfig(
                    "dispatch_interval must be non-zero".into(),
                ));
            }
            if shared.running.swap(true, Ordering::AcqRel) {
                return Err(PoolError::AlreadyRunning);
            }

            tracing::info!(workers, "Starting worker pool");
            shared.lock().target = workers;
            for _ in 0..workers {
                if let Err(e) = shared.spawn_worker().await {
                    tracing::warn!(error = %e, "Worker failed to start");
                }
            }

            let shutdown = CancellationToken::new();
            let dispatcher = {
                let shared = shared.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(shared.config.dispatch_interval);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = interval.tick() => shared.dispatch().await,
                        }
                    }
                    tracing::debug!("Dispatcher stopped");
                })
            };

            let mut state = shared.lock();
            state.shutdown = Some(shutdown);
            state.dispatcher = Some(dispatcher);
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), PoolError>> {
        Box::pin(async move {
            let shared = &self.shared;
            if !shared.running.swap(false, Ordering::AcqRel) {
                return Err(PoolError::NotRunning);
            }

            let (shutdown, dispatcher, workers, retiring) = {
                let mut state = shared.lock();
                state.target = 0;
                (
                    state.shutdown.take(),
                    state.dispatcher.take(),
                    std::mem::take(&mut state.workers),
                    std::mem::take(&mut state.retiring),
                )
            };

            tracing::info!(workers = workers.len(), "Stopping worker pool");
            if let Some(shutdown) = shutdown {
                shutdown.cancel();
            }
            if let Some(dispatcher) = dispatcher {
                let _ = dispatcher.await;
            }

            let mut handles = Vec::with_capacity(workers.len() + retiring.len());
            for worker in workers {
                worker.slot.retire();
                let _ = worker.actor.send_message(WorkerMessage::Shutdown);
                handles.push(worker.handle);
            }
            // Already told to shut down by `remove_worker`.
            handles.extend(retiring.into_iter().map(|w| w.handle));

            let timeout = shared.config.shutdown_timeout;
            match tokio::time::timeout(timeout, join_all(handles)).await {
                Ok(_) => {
                    tracing::info!("Worker pool stopped");
                    Ok(())
                }
                Err(_) => {
                    tracing::warn!(?timeout, "Workers still busy at shutdown deadline");
                    Err(PoolError::ShutdownTimeout(timeout))
                }
            }
        })
    }

    fn add_worker(&self) -> BoxFuture<'_, Result<(), PoolError>> {
        Box::pin(async move {
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(PoolError::NotRunning);
            }
            self.shared.spawn_worker().await?;
            self.shared.lock().target += 1;
            Ok(())
        })
    }

    fn remove_worker(&self) -> Result<(), PoolError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(PoolError::NotRunning);
        }

        let mut state = self.shared.lock();
        let index = state
            .workers
            .iter()
            .position(|w| w.slot.try_retire_idle())
            .or_else(|| (!state.workers.is_empty()).then(|| state.workers.len() - 1))
            .ok_or(PoolError::NoWorkers)?;
        state.target = state.target.saturating_sub(1);
        let worker = state.workers.remove(index);

        worker.slot.retire();
        tracing::info!(worker_id = %worker.id, "Retiring worker");
        let _ = worker.actor.send_message(WorkerMessage::Shutdown);

        state.retiring.retain(|w| !w.handle.is_finished());
        state.retiring.push(worker);
        Ok(())
    }

    fn worker_count(&self) -> usize {
        self.shared.lock().workers.len()
    }

    fn active_jobs(&self) -> usize {
        self.active().running()
    }

    fn queue_size(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            self.shared.queue.size().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Queue size unavailable");
                0
            })
        })
    }

    fn is_healthy(&self) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        let state = self.shared.lock();
        let alive = state
            .workers
            .iter()
            .filter(|w| !w.handle.is_finished())
            .count();
        alive * 2 >= state.target
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn signal_stop(&self, id: JobId, reason: StopReason) -> StopOutcome {
        self.active().stop(id, reason)
    }

    fn clear_stop(&self, id: JobId) {
        self.active().clear_tombstone(id);
    }

    fn stats(&self) -> BoxFuture<'_, PoolStats> {
        Box::pin(async move {
            let queue_size = self.queue_size().await;
            let counters = &self.shared.counters;
            let (worker_count, target_workers, idle_workers, retiring_workers) = {
                let state = self.shared.lock();
                (
                    state.workers.len(),
                    state.target,
                    state
                        .workers
                        .iter()
                        .filter(|w| w.slot.phase() == WorkerPhase::Idle)
                        .count(),
                    state
                        .retiring
                        .iter()
                        .filter(|w| !w.handle.is_finished())
                        .count(),
                )
            };

            PoolStats {
                worker_count,
                target_workers,
                idle_workers,
                retiring_workers,
                active_jobs: self.active_jobs(),
                queue_size,
                jobs_processed: counters.processed(),
                jobs_completed: counters.completed(),
                jobs_failed: counters.failed(),
                average_runtime_ms: counters.average_runtime_ms(),
                is_healthy: self.is_healthy(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use db::DbConfig;
    use job_core::{ExecutionResult, Job, JobStatus, JobType, Storage};

    use super::*;
    use crate::event_bus::MemoryEventBus;
    use crate::handler::{FnHandler, HandlerExecutor, JobContext, JobHandlerRegistry};
    use crate::queue_actor::QueueHandle;

    struct Fixture {
        pool: DefaultWorkerPool,
        queue: QueueHandle,
        storage: Arc<dyn Storage>,
    }

    fn fast() -> PoolConfig {
        PoolConfig {
            dispatch_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    async fn fixture(handlers: JobHandlerRegistry, config: PoolConfig) -> Fixture {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let storage: Arc<dyn Storage> = Arc::new(db::init(DbConfig::memory()).await.unwrap());
        let (queue, _) = QueueHandle::spawn(Duration::from_secs(5)).await.unwrap();
        let ctx = WorkerContext {
            storage: storage.clone(),
            bus: Arc::new(MemoryEventBus::default()),
            executor: Arc::new(HandlerExecutor::new(handlers)),
            active: Arc::new(ActiveJobs::new()),
            cancel_grace: Duration::from_secs(10),
        };
        let pool = DefaultWorkerPool::new(config, Arc::new(queue.clone()), ctx);
        Fixture {
            pool,
            queue,
            storage,
        }
    }

    fn sleeping(delay: Duration) -> JobHandlerRegistry {
        JobHandlerRegistry::new().with(FnHandler::new(JobType::Provisioning, move |_ctx: JobContext| {
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(ExecutionResult::succeeded("done"))
            })
        }))
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn finished_workers(pool: &DefaultWorkerPool) -> usize {
        pool.shared
            .lock()
            .workers
            .iter()
            .filter(|w| w.handle.is_finished())
            .count()
    }

    fn kill_worker(pool: &DefaultWorkerPool, index: usize) {
        pool.shared.lock().workers[index].actor.stop(None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unhealthy_once_fewer_than_half_the_workers_live() {
        let f = fixture(JobHandlerRegistry::new(), fast()).await;
        f.pool.start(4).await.unwrap();
        assert!(f.pool.is_healthy());

        kill_worker(&f.pool, 0);
        kill_worker(&f.pool, 1);
        wait_until(|| finished_workers(&f.pool) == 2).await;
        assert!(f.pool.is_healthy());

        kill_worker(&f.pool, 2);
        wait_until(|| finished_workers(&f.pool) == 3).await;
        assert!(!f.pool.is_healthy());
        assert!(!f.pool.stats().await.is_healthy);

        f.pool.stop().await.unwrap();
        assert!(!f.pool.is_healthy());
    }

    #[tokio::test]
    async fn undeliverable_job_goes_back_to_the_queue() {
        let f = fixture(JobHandlerRegistry::new(), fast()).await;
        f.pool.shared.spawn_worker().await.unwrap();
        kill_worker(&f.pool, 0);
        wait_until(|| finished_workers(&f.pool) == 1).await;

        let job = Job::new("orphan", JobType::Provisioning, serde_json::Value::Null);
        f.queue.enqueue(job.clone()).await.unwrap();
        f.pool.shared.dispatch().await;

        assert_eq!(f.queue.size().await.unwrap(), 1);
        assert_eq!(f.queue.peek().await.unwrap().id, job.id);
        let slot = f.pool.shared.lock().workers[0].slot.clone();
        assert_eq!(slot.phase(), WorkerPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_waits_for_a_removed_worker_to_finish() {
        let f = fixture(sleeping(Duration::from_millis(300)), fast()).await;
        let job = Job::new("slow", JobType::Provisioning, serde_json::Value::Null);
        f.storage.save_job(&job).await.unwrap();

        f.pool.start(1).await.unwrap();
        f.queue.enqueue(job.clone()).await.unwrap();
        wait_until(|| f.pool.active_jobs() == 1).await;

        f.pool.remove_worker().unwrap();
        assert_eq!(f.pool.worker_count(), 0);
        assert_eq!(f.pool.stats().await.retiring_workers, 1);

        f.pool.stop().await.unwrap();
        let stored = f.storage.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);

        let stats = f.pool.stats().await;
        assert_eq!(stats.jobs_processed, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert!(stats.average_runtime_ms.unwrap_or_default() >= 250);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_job_never_runs_on_two_workers_at_once() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let handlers = {
            let (in_flight, peak, runs) = (in_flight.clone(), peak.clone(), runs.clone());
            JobHandlerRegistry::new().with(FnHandler::new(JobType::Provisioning, move |_ctx: JobContext| {
                let (in_flight, peak, runs) = (in_flight.clone(), peak.clone(), runs.clone());
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(ExecutionResult::succeeded(""))
                })
            }))
        };
        let f = fixture(handlers, fast()).await;
        let job = Job::new("dup", JobType::Provisioning, serde_json::Value::Null);
        f.storage.save_job(&job).await.unwrap();

        // The same id queued three times, with a worker free for each copy.
        for _ in 0..3 {
            f.queue.enqueue(job.clone()).await.unwrap();
        }
        f.pool.start(3).await.unwrap();
        wait_until(|| runs.load(Ordering::SeqCst) >= 1).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        f.pool.stop().await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(f.queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_dispatch_interval_is_rejected() {
        let config = PoolConfig {
            dispatch_interval: Duration::ZERO,
            ..PoolConfig::default()
        };
        let f = fixture(JobHandlerRegistry::new(), config).await;

        assert!(matches!(
            f.pool.start(1).await,
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(!f.pool.is_running());
        assert_eq!(f.pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn lifecycle_guards() {
        let f = fixture(JobHandlerRegistry::new(), fast()).await;
        assert!(matches!(f.pool.stop().await, Err(PoolError::NotRunning)));
        assert!(matches!(f.pool.remove_worker(), Err(PoolError::NotRunning)));

        f.pool.start(1).await.unwrap();
        assert!(matches!(f.pool.start(1).await, Err(PoolError::AlreadyRunning)));
        f.pool.remove_worker().unwrap();
        assert!(matches!(f.pool.remove_worker(), Err(PoolError::NoWorkers)));
        f.pool.stop().await.unwrap();
    }
}
