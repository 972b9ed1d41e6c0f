//! Worker actor for executing jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use job_core::{ExecutionResult, Job, JobEvent, JobEventType, JobStatus, Storage};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::active::{ActiveJobs, StopReason};
use crate::event_bus::{EventBus, emit};
use crate::executor::{Executor, ExecutorError};
use crate::messages::WorkerMessage;

/// Lifecycle phase of a worker, shared with the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    Idle = 0,
    /// Picked by the dispatcher; a job is on its way.
    Assigned = 1,
    Running = 2,
    /// Finishes its current job, then stops.
    Retiring = 3,
    Stopped = 4,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::Idle,
            1 => WorkerPhase::Assigned,
            2 => WorkerPhase::Running,
            3 => WorkerPhase::Retiring,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// Atomic phase cell read by the dispatcher without messaging the worker.
#[derive(Debug)]
pub struct WorkerSlot(AtomicU8);

impl Default for WorkerSlot {
    fn default() -> Self {
        Self(AtomicU8::new(WorkerPhase::Idle as u8))
    }
}

impl WorkerSlot {
    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: WorkerPhase, to: WorkerPhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reserve an idle worker for a job.
    pub fn try_assign(&self) -> bool {
        self.transition(WorkerPhase::Idle, WorkerPhase::Assigned)
    }

    /// Hand an unused reservation back.
    pub fn unassign(&self) {
        self.transition(WorkerPhase::Assigned, WorkerPhase::Idle);
    }

    /// Retire an idle worker, if this one is idle.
    pub fn try_retire_idle(&self) -> bool {
        self.transition(WorkerPhase::Idle, WorkerPhase::Retiring)
    }

    /// Retire whatever the worker is doing.
    pub fn retire(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != WorkerPhase::Stopped as u8).then_some(WorkerPhase::Retiring as u8)
            });
    }

    fn begin(&self) {
        if !self.transition(WorkerPhase::Assigned, WorkerPhase::Running) {
            self.transition(WorkerPhase::Idle, WorkerPhase::Running);
        }
    }

    fn end(&self) {
        self.transition(WorkerPhase::Running, WorkerPhase::Idle);
    }

    fn stopped(&self) {
        self.0.store(WorkerPhase::Stopped as u8, Ordering::Release);
    }
}

/// Outcome tallies shared by every worker in a pool.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    processed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    runtime_ms: AtomicU64,
}

impl WorkerCounters {
    fn record(&self, outcome: Option<(JobStatus, u64)>) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let Some((status, duration_ms)) = outcome else {
            return;
        };
        if status == JobStatus::Completed {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.runtime_ms.fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Jobs handed to a worker, including ones stopped before they ran.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Mean run time of jobs whose outcome a worker recorded.
    pub fn average_runtime_ms(&self) -> Option<u64> {
        let finished = self.completed() + self.failed();
        (finished > 0).then(|| self.runtime_ms.load(Ordering::Relaxed) / finished)
    }
}

/// Collaborators shared by every worker in a pool.
pub struct WorkerContext {
    pub storage: Arc<dyn Storage>,
    pub bus: Arc<dyn EventBus>,
    pub executor: Arc<dyn Executor>,
    pub active: Arc<ActiveJobs>,
    /// How long to wait for a cancelled executor before giving up on it.
    pub cancel_grace: Duration,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub slot: Arc<WorkerSlot>,
    pub ctx: Arc<WorkerContext>,
    pub counters: Arc<WorkerCounters>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    pub worker_id: String,
    pub slot: Arc<WorkerSlot>,
    ctx: Arc<WorkerContext>,
    counters: Arc<WorkerCounters>,
    pub jobs_processed: u64,
}

/// Worker actor that executes one job at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            slot: args.slot,
            ctx: args.ctx,
            counters: args.counters,
            jobs_processed: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { job } => {
                state.slot.begin();
                let outcome = run_job(&state.ctx, &state.worker_id, *job).await;
                state.counters.record(outcome);
                state.jobs_processed += 1;
                state.slot.end();
            }

            WorkerMessage::Shutdown => {
                tracing::info!(
                    worker_id = %state.worker_id,
                    jobs_processed = state.jobs_processed,
                    "Shutting down worker"
                );
                state.slot.stopped();
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Run one attempt of `job` and record its outcome. Returns the recorded
/// status and duration, or `None` when someone else stopped the job.
async fn run_job(ctx: &WorkerContext, worker_id: &str, mut job: Job) -> Option<(JobStatus, u64)> {
    let job_id = job.id;

    let Some(token) = ctx.active.register(job_id) else {
        tracing::debug!(%job_id, worker_id, "Job was stopped before it started");
        return None;
    };

    if token.is_cancelled() {
        abandon_stopped(ctx, &job).await;
        return None;
    }

    job.status = JobStatus::Running;
    job.started_at = Some(Utc::now());
    if let Err(e) = ctx.storage.update_job(&job).await {
        tracing::warn!(%job_id, error = %e, "Failed to persist running job");
    }

    // A stop that landed during the write owns the record; never announce
    // or execute the job.
    if token.is_cancelled() {
        tracing::debug!(%job_id, worker_id, "Job was stopped while starting");
        abandon_stopped(ctx, &job).await;
        return None;
    }

    tracing::info!(%job_id, worker_id, job_type = %job.job_type, "Job started");
    emit(
        ctx.storage.as_ref(),
        ctx.bus.as_ref(),
        JobEvent::new(&job, JobEventType::Started, format!("started by {worker_id}"))
            .with_data("worker_id", serde_json::json!(worker_id)),
    )
    .await;

    let abandon = token.clone();
    let grace = ctx.cancel_grace;
    let outcome = tokio::select! {
        result = ctx.executor.execute(&job, token) => Some(result),
        _ = async move {
            abandon.cancelled().await;
            tokio::time::sleep(grace).await;
        } => None,
    };

    if let Some(reason) = ctx.active.finish(job_id) {
        repair_stopped(ctx, &job, reason).await;
        return None;
    }

    let now = Utc::now();
    let result = match outcome {
        Some(Ok(result)) => result,
        Some(Err(e)) => ExecutionResult::failed(-1, execution_error(e)),
        None => ExecutionResult::failed(-1, "execution abandoned"),
    };
    job.apply_outcome(&result, now);

    if let Err(e) = ctx.storage.update_job(&job).await {
        tracing::warn!(%job_id, error = %e, "Failed to persist job outcome");
    }
    ctx.active.release(job_id);

    let (event_type, message) = if job.status == JobStatus::Completed {
        (JobEventType::Completed, "completed".to_string())
    } else {
        (
            JobEventType::Failed,
            job.error_message
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
        )
    };
    tracing::info!(
        %job_id,
        worker_id,
        status = %job.status,
        duration_ms = job.duration_ms.unwrap_or_default(),
        "Job finished"
    );

    emit(
        ctx.storage.as_ref(),
        ctx.bus.as_ref(),
        JobEvent::new(&job, event_type, message)
            .with_data("duration_ms", serde_json::json!(job.duration_ms))
            .with_data("exit_code", serde_json::json!(result.exit_code))
            .with_data("task_stats", serde_json::json!(result.task_stats))
            .with_data("host_stats", serde_json::json!(result.host_stats)),
    )
    .await;

    Some((job.status, job.duration_ms.unwrap_or_default()))
}

/// Give a stopped job back to whoever stopped it.
async fn abandon_stopped(ctx: &WorkerContext, job: &Job) {
    if let Some(reason) = ctx.active.finish(job.id) {
        repair_stopped(ctx, job, reason).await;
    }
}

fn execution_error(err: ExecutorError) -> String {
    match err {
        ExecutorError::Execution(msg) => msg,
        other => other.to_string(),
    }
}

/// The stopping party owns the terminal status. Only fix a record still
/// showing `running`, which happens when our own write raced theirs.
async fn repair_stopped(ctx: &WorkerContext, job: &Job, reason: StopReason) {
    let mut stored = match ctx.storage.get_job(job.id).await {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to reload stopped job");
            return;
        }
    };

    if stored.status != JobStatus::Running {
        return;
    }

    stored.status = reason.status();
    if stored.completed_at.is_none() {
        stored.finish(Utc::now());
    }
    if let Err(e) = ctx.storage.update_job(&stored).await {
        tracing::warn!(job_id = %job.id, error = %e, "Failed to repair stopped job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_transitions() {
        let slot = WorkerSlot::default();
        assert_eq!(slot.phase(), WorkerPhase::Idle);
        assert!(slot.try_assign());
        assert!(!slot.try_assign());
        slot.unassign();
        assert!(slot.try_assign());

        slot.begin();
        assert_eq!(slot.phase(), WorkerPhase::Running);
        assert!(!slot.try_retire_idle());
        slot.retire();
        slot.end();
        // A retiring worker never goes back to idle.
        assert_eq!(slot.phase(), WorkerPhase::Retiring);

        slot.stopped();
        slot.retire();
        assert_eq!(slot.phase(), WorkerPhase::Stopped);
    }

    #[test]
    fn counters_average_recorded_outcomes_only() {
        let counters = WorkerCounters::default();
        assert_eq!(counters.average_runtime_ms(), None);

        counters.record(Some((JobStatus::Completed, 100)));
        counters.record(Some((JobStatus::Failed, 300)));
        counters.record(None);

        assert_eq!(counters.processed(), 3);
        assert_eq!(counters.completed(), 1);
        assert_eq!(counters.failed(), 1);
        assert_eq!(counters.average_runtime_ms(), Some(200));
    }
}
