//! Core domain types for the job orchestration system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and friends for work items
//! - Events for audit and real-time updates
//! - The `Storage` contract and the error taxonomy

mod error;
mod events;
mod filter;
mod job;
mod storage;

pub use error::{JobError, QueueError, StorageError};
pub use events::{JobEvent, JobEventType};
pub use filter::{JobFilter, JobStats};
pub use job::{ExecutionResult, Job, JobId, JobRequest, JobResult, JobStatus, JobType, Priority};
pub use storage::Storage;
