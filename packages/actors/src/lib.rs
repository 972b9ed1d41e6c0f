//! Actor runtime for the job orchestrator.
//!
//! This crate provides the Ractor-based pieces that move jobs from
//! submission to a terminal status.
//!
//! # Architecture
//!
//! - `JobManager` - Public entry point and lifecycle state machine
//! - `QueueActor` - Priority queue with scheduled promotion, behind `QueueHandle`
//! - `WorkerActor` - Executes one job at a time, fed by `DefaultWorkerPool`
//! - `MemoryEventBus` - Fan-out of job events to subscribers
//!
//! # Usage
//!
//! ```ignore
//! use actors::{HandlerExecutor, JobHandlerRegistry, JobManager, ManagerConfig, job_handler};
//!
//! let handlers = JobHandlerRegistry::new().with(job_handler!(JobType::Ansible, |ctx| {
//!     Ok(ExecutionResult::succeeded(format!("ran {}", ctx.job.name)))
//! }));
//! let manager = JobManager::with_defaults(config, storage, Arc::new(HandlerExecutor::new(handlers))).await?;
//! manager.start().await?;
//! ```

mod active;
mod config;
mod event_bus;
mod executor;
mod handler;
mod manager;
mod messages;
mod pool;
mod queue_actor;
mod worker_actor;

pub use active::{ActiveJobs, StopOutcome, StopReason};
pub use config::{ConfigError, ManagerConfig};
pub use event_bus::{
    EventBus, EventBusStats, MemoryEventBus, Subscription, SubscriptionId, emit,
};
pub use executor::{Executor, ExecutorError};
pub use handler::{
    FnHandler, HandlerExecutor, HandlerFuture, HandlerResult, JobContext, JobHandler,
    JobHandlerRegistry, LogSink,
};
pub use manager::{JobManager, ManagerStats};
pub use messages::{QueueMessage, WorkerMessage};
pub use pool::{DefaultWorkerPool, PoolConfig, PoolError, PoolStats, WorkerPool};
pub use queue_actor::{JobQueue, QueueActor, QueueActorState, QueueHandle};
pub use worker_actor::{WorkerActor, WorkerContext, WorkerCounters, WorkerPhase, WorkerSlot};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
