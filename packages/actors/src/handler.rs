//! Job handler trait, registry and the handler-backed executor.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use job_core::{ExecutionResult, Job, JobId, JobStatus, JobType};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::executor::{Executor, ExecutorError};

/// Result type for job handlers.
pub type HandlerResult = Result<ExecutionResult, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Sink for a running job's log lines.
#[derive(Clone)]
pub struct LogSink {
    tx: broadcast::Sender<String>,
}

impl LogSink {
    /// Emit one line. Lines nobody is listening for are discarded.
    pub fn line(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }
}

/// Everything a handler gets for one attempt.
#[derive(Clone)]
pub struct JobContext {
    pub job: Job,
    pub cancel: CancellationToken,
    pub logs: LogSink,
}

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Process a job and return the result.
    fn handle(&self, ctx: JobContext) -> HandlerFuture;

    /// Reject payloads this handler cannot run.
    fn validate(&self, _job: &Job) -> Result<(), String> {
        Ok(())
    }
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job type.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        self.handlers.insert(handler.job_type(), Arc::new(handler));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<H: JobHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    job_type: JobType,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_type: JobType, handler: F) -> Self {
        Self { job_type, handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

/// Helper macro for creating job handlers from async closures.
#[macro_export]
macro_rules! job_handler {
    ($job_type:expr, |$ctx:ident| $body:expr) => {
        $crate::FnHandler::new($job_type, |$ctx: $crate::JobContext| {
            Box::pin(async move { $body })
        })
    };
}

struct Execution {
    cancel: CancellationToken,
    logs: broadcast::Sender<String>,
}

/// Removes the execution entry however the attempt ends, including when
/// the caller drops the future.
struct ExecutionGuard<'a> {
    running: &'a Mutex<HashMap<JobId, Execution>>,
    job_id: JobId,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.job_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Executor`] that routes each job to the handler registered for its type.
pub struct HandlerExecutor {
    handlers: JobHandlerRegistry,
    running: Mutex<HashMap<JobId, Execution>>,
    log_buffer: usize,
}

impl HandlerExecutor {
    pub fn new(handlers: JobHandlerRegistry) -> Self {
        Self {
            handlers,
            running: Mutex::new(HashMap::new()),
            log_buffer: 256,
        }
    }

    /// Number of attempts currently inside a handler.
    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }
}

impl Executor for HandlerExecutor {
    fn execute<'a>(
        &'a self,
        job: &'a Job,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<ExecutionResult, ExecutorError>> {
        Box::pin(async move {
            let handler = self.handlers.get(job.job_type).ok_or_else(|| {
                ExecutorError::Execution(format!("No handler for job type: {}", job.job_type))
            })?;

            let cancel = cancel.child_token();
            let (logs, _) = broadcast::channel(self.log_buffer);
            lock(&self.running).insert(
                job.id,
                Execution {
                    cancel: cancel.clone(),
                    logs: logs.clone(),
                },
            );
            let _guard = ExecutionGuard {
                running: &self.running,
                job_id: job.id,
            };

            let started = Instant::now();
            let ctx = JobContext {
                job: job.clone(),
                cancel,
                logs: LogSink { tx: logs },
            };

            let mut result = handler.handle(ctx).await.map_err(ExecutorError::Execution)?;
            if result.duration_ms == 0 {
                result.duration_ms = started.elapsed().as_millis() as u64;
            }
            Ok(result)
        })
    }

    fn status(&self, id: JobId) -> BoxFuture<'_, Result<JobStatus, ExecutorError>> {
        Box::pin(async move {
            if lock(&self.running).contains_key(&id) {
                Ok(JobStatus::Running)
            } else {
                Err(ExecutorError::NotFound(id))
            }
        })
    }

    fn cancel(&self, id: JobId) -> BoxFuture<'_, Result<(), ExecutorError>> {
        Box::pin(async move {
            let running = lock(&self.running);
            let execution = running.get(&id).ok_or(ExecutorError::NotFound(id))?;
            execution.cancel.cancel();
            Ok(())
        })
    }

    fn stream_logs(
        &self,
        id: JobId,
    ) -> BoxFuture<'_, Result<BoxStream<'static, String>, ExecutorError>> {
        Box::pin(async move {
            let rx = match lock(&self.running).get(&id) {
                Some(execution) => execution.logs.subscribe(),
                None => return Ok(stream::empty().boxed()),
            };

            let lines = stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(line) => return Some((line, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Log stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            });

            Ok(lines.boxed())
        })
    }

    fn is_healthy(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn validate_job(&self, job: &Job) -> Result<(), ExecutorError> {
        let handler = self.handlers.get(job.job_type).ok_or_else(|| {
            ExecutorError::Validation(format!("No handler for job type: {}", job.job_type))
        })?;
        handler.validate(job).map_err(ExecutorError::Validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn echo() -> impl JobHandler {
        FnHandler::new(JobType::Ansible, |ctx: JobContext| {
            Box::pin(async move {
                ctx.logs.line(format!("running {}", ctx.job.name));
                Ok(ExecutionResult::succeeded("ok").with_task_stat("ok", 1))
            })
        })
    }

    fn job(job_type: JobType) -> Job {
        Job::new("handler", job_type, serde_json::Value::Null)
    }

    #[tokio::test]
    async fn routes_by_job_type() {
        let executor = HandlerExecutor::new(JobHandlerRegistry::new().with(echo()));
        let job = job(JobType::Ansible);

        let result = executor
            .execute(&job, CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.task_stats.get("ok"), Some(&1));
        assert_eq!(executor.running_count(), 0);

        let missing = executor
            .execute(&self::job(JobType::Provisioning), CancellationToken::new())
            .await;
        assert!(matches!(missing, Err(ExecutorError::Execution(_))));
    }

    #[tokio::test]
    async fn validate_requires_a_handler() {
        let executor = HandlerExecutor::new(JobHandlerRegistry::new().with(echo()));
        assert!(executor.validate_job(&job(JobType::Ansible)).is_ok());
        assert!(matches!(
            executor.validate_job(&job(JobType::Deprovisioning)),
            Err(ExecutorError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn cancel_reaches_the_handler() {
        let waiter = FnHandler::new(JobType::Ansible, |ctx: JobContext| {
            Box::pin(async move {
                ctx.cancel.cancelled().await;
                Err("cancelled".to_string())
            })
        });
        let executor = Arc::new(HandlerExecutor::new(JobHandlerRegistry::new().with(waiter)));
        let job = job(JobType::Ansible);
        let id = job.id;

        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&job, CancellationToken::new()).await })
        };

        while executor.status(id).await.is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        executor.cancel(id).await.unwrap();

        let outcome = runner.await.unwrap();
        assert!(matches!(outcome, Err(ExecutorError::Execution(_))));
        assert!(matches!(
            executor.cancel(id).await,
            Err(ExecutorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn log_stream_ends_with_the_job() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let handler_gate = gate.clone();
        let chatty = FnHandler::new(JobType::Ansible, move |ctx: JobContext| {
            let gate = handler_gate.clone();
            Box::pin(async move {
                gate.notified().await;
                ctx.logs.line("TASK [setup]");
                ctx.logs.line("PLAY RECAP");
                Ok(ExecutionResult::succeeded(""))
            })
        });
        let executor = Arc::new(HandlerExecutor::new(JobHandlerRegistry::new().with(chatty)));
        let job = job(JobType::Ansible);
        let id = job.id;

        let runner = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&job, CancellationToken::new()).await })
        };
        while executor.status(id).await.is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let logs = executor.stream_logs(id).await.unwrap();
        gate.notify_one();
        let lines: Vec<String> = logs.collect().await;
        assert_eq!(lines, vec!["TASK [setup]", "PLAY RECAP"]);
        runner.await.unwrap().unwrap();
    }
}
