//! Message types for actor communication.

use chrono::{DateTime, Utc};
use job_core::{Job, JobId};
use ractor::RpcReplyPort;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Add a ready job at its priority.
    Enqueue {
        job: Box<Job>,
        reply: RpcReplyPort<()>,
    },

    /// Hold a job until `at`.
    EnqueueAt {
        job: Box<Job>,
        at: DateTime<Utc>,
        reply: RpcReplyPort<()>,
    },

    /// Take the most urgent ready job.
    Dequeue { reply: RpcReplyPort<Option<Job>> },

    /// Look at the most urgent ready job without taking it.
    Peek { reply: RpcReplyPort<Option<Job>> },

    /// Ready plus scheduled jobs.
    Size { reply: RpcReplyPort<usize> },

    /// Drop a waiting job. Replies whether it was found.
    Remove {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// Jobs still waiting for their activation time.
    ScheduledJobs { reply: RpcReplyPort<Vec<Job>> },

    /// Ready jobs in dispatch order.
    QueuedJobs { reply: RpcReplyPort<Vec<Job>> },

    /// Liveness check.
    Ping { reply: RpcReplyPort<()> },

    /// Shutdown the queue.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Start working on a job.
    ProcessJob { job: Box<Job> },

    /// Stop once the current job is done.
    Shutdown,
}
