//! Queue actor holding ready and scheduled jobs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use job_core::{Job, JobId, JobStatus, QueueError};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::task::JoinHandle;

use crate::messages::QueueMessage;

/// Priority-ordered job queue with deferred activation.
pub trait JobQueue: Send + Sync + 'static {
    /// Add a job to the ready set, marking it queued.
    fn enqueue(&self, job: Job) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Hold a job until `at`, marking it scheduled.
    fn enqueue_at(&self, job: Job, at: DateTime<Utc>) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Take the most urgent ready job, or [`QueueError::Empty`].
    fn dequeue(&self) -> BoxFuture<'_, Result<Job, QueueError>>;

    fn peek(&self) -> BoxFuture<'_, Result<Job, QueueError>>;

    fn size(&self) -> BoxFuture<'_, Result<usize, QueueError>>;

    fn remove_job(&self, id: JobId) -> BoxFuture<'_, Result<(), QueueError>>;

    fn scheduled_jobs(&self) -> BoxFuture<'_, Result<Vec<Job>, QueueError>>;

    fn queued_jobs(&self) -> BoxFuture<'_, Result<Vec<Job>, QueueError>>;

    fn ping(&self) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// Ready-set entry: higher priority first, then older jobs, then FIFO.
#[derive(Debug, Clone)]
struct ReadyJob {
    job: Job,
    seq: u64,
}

impl PartialEq for ReadyJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyJob {}

impl PartialOrd for ReadyJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.job.created_at.cmp(&self.job.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduled-set entry: earliest activation first.
#[derive(Debug, Clone)]
struct ScheduledJob {
    job: Job,
    at: DateTime<Utc>,
    seq: u64,
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// State for the queue actor.
#[derive(Default)]
pub struct QueueActorState {
    ready: BinaryHeap<ReadyJob>,
    scheduled: BinaryHeap<ScheduledJob>,
    seq: u64,
}

impl QueueActorState {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn enqueue(&mut self, mut job: Job) {
        job.status = JobStatus::Queued;
        let seq = self.next_seq();
        self.ready.push(ReadyJob { job, seq });
    }

    pub fn enqueue_at(&mut self, mut job: Job, at: DateTime<Utc>) {
        job.status = JobStatus::Scheduled;
        job.scheduled_at = Some(at);
        let seq = self.next_seq();
        self.scheduled.push(ScheduledJob { job, at, seq });
    }

    /// Move every scheduled job whose time has come into the ready set.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while self.scheduled.peek().is_some_and(|s| s.at <= now) {
            if let Some(due) = self.scheduled.pop() {
                tracing::debug!(job_id = %due.job.id, "Scheduled job is due");
                self.enqueue(due.job);
            }
        }
    }

    pub fn dequeue(&mut self, now: DateTime<Utc>) -> Option<Job> {
        self.promote_due(now);
        self.ready.pop().map(|r| r.job)
    }

    pub fn peek(&mut self, now: DateTime<Utc>) -> Option<Job> {
        self.promote_due(now);
        self.ready.peek().map(|r| r.job.clone())
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&mut self, job_id: JobId) -> bool {
        let before = self.len();
        self.ready.retain(|r| r.job.id != job_id);
        self.scheduled.retain(|s| s.job.id != job_id);
        self.len() != before
    }

    pub fn scheduled_jobs(&self) -> Vec<Job> {
        let mut entries: Vec<&ScheduledJob> = self.scheduled.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|s| s.job.clone()).collect()
    }

    pub fn queued_jobs(&self) -> Vec<Job> {
        let mut entries: Vec<&ReadyJob> = self.ready.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|r| r.job.clone()).collect()
    }
}

/// Queue actor; its mailbox serializes every queue operation.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor");
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { job, reply } => {
                tracing::debug!(job_id = %job.id, priority = %job.priority, "Enqueued job");
                state.enqueue(*job);
                let _ = reply.send(());
            }

            QueueMessage::EnqueueAt { job, at, reply } => {
                tracing::debug!(job_id = %job.id, %at, "Scheduled job");
                state.enqueue_at(*job, at);
                let _ = reply.send(());
            }

            QueueMessage::Dequeue { reply } => {
                let job = state.dequeue(Utc::now());
                if job.is_none() {
                    tracing::trace!("Queue empty");
                }
                let _ = reply.send(job);
            }

            QueueMessage::Peek { reply } => {
                let _ = reply.send(state.peek(Utc::now()));
            }

            QueueMessage::Size { reply } => {
                let _ = reply.send(state.len());
            }

            QueueMessage::Remove { job_id, reply } => {
                let _ = reply.send(state.remove(job_id));
            }

            QueueMessage::ScheduledJobs { reply } => {
                let _ = reply.send(state.scheduled_jobs());
            }

            QueueMessage::QueuedJobs { reply } => {
                let _ = reply.send(state.queued_jobs());
            }

            QueueMessage::Ping { reply } => {
                let _ = reply.send(());
            }

            QueueMessage::Shutdown => {
                tracing::info!(remaining = state.len(), "Shutting down queue actor");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Cloneable handle implementing [`JobQueue`] over a running [`QueueActor`].
#[derive(Clone)]
pub struct QueueHandle {
    actor: ActorRef<QueueMessage>,
    call_timeout: Duration,
}

impl QueueHandle {
    /// Spawn a fresh queue actor.
    pub async fn spawn(
        call_timeout: Duration,
    ) -> Result<(Self, JoinHandle<()>), ractor::SpawnErr> {
        let (actor, handle) = Actor::spawn(None, QueueActor, QueueActorState::new()).await?;
        Ok((
            Self {
                actor,
                call_timeout,
            },
            handle,
        ))
    }

    /// Ask the actor to stop.
    pub fn shutdown(&self) {
        let _ = self.actor.send_message(QueueMessage::Shutdown);
    }

    async fn call<T, F>(&self, build: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> QueueMessage,
    {
        match ractor::rpc::call(&self.actor, build, Some(self.call_timeout)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(QueueError::Unavailable("queue call timed out".into())),
            Ok(CallResult::SenderError) => {
                Err(QueueError::Unavailable("queue dropped the reply".into()))
            }
            Err(e) => Err(QueueError::Unavailable(e.to_string())),
        }
    }
}

impl JobQueue for QueueHandle {
    fn enqueue(&self, job: Job) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(self.call(move |reply| QueueMessage::Enqueue {
            job: Box::new(job),
            reply,
        }))
    }

    fn enqueue_at(&self, job: Job, at: DateTime<Utc>) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(self.call(move |reply| QueueMessage::EnqueueAt {
            job: Box::new(job),
            at,
            reply,
        }))
    }

    fn dequeue(&self) -> BoxFuture<'_, Result<Job, QueueError>> {
        Box::pin(async move {
            self.call(|reply| QueueMessage::Dequeue { reply })
                .await?
                .ok_or(QueueError::Empty)
        })
    }

    fn peek(&self) -> BoxFuture<'_, Result<Job, QueueError>> {
        Box::pin(async move {
            self.call(|reply| QueueMessage::Peek { reply })
                .await?
                .ok_or(QueueError::Empty)
        })
    }

    fn size(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        Box::pin(self.call(|reply| QueueMessage::Size { reply }))
    }

    fn remove_job(&self, id: JobId) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            let found = self
                .call(move |reply| QueueMessage::Remove { job_id: id, reply })
                .await?;
            if found {
                Ok(())
            } else {
                Err(QueueError::NotFound(id))
            }
        })
    }

    fn scheduled_jobs(&self) -> BoxFuture<'_, Result<Vec<Job>, QueueError>> {
        Box::pin(self.call(|reply| QueueMessage::ScheduledJobs { reply }))
    }

    fn queued_jobs(&self) -> BoxFuture<'_, Result<Vec<Job>, QueueError>> {
        Box::pin(self.call(|reply| QueueMessage::QueuedJobs { reply }))
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(self.call(|reply| QueueMessage::Ping { reply }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use job_core::{JobType, Priority};

    fn job(name: &str, priority: Priority) -> Job {
        Job::new(name, JobType::Ansible, serde_json::Value::Null).with_priority(priority)
    }

    fn names(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.name.as_str()).collect()
    }

    #[test]
    fn dequeues_by_priority_then_fifo() {
        let mut state = QueueActorState::new();
        let base = Utc::now();
        let mut a = job("a", Priority::NORMAL);
        let mut b = job("b", Priority::HIGH);
        let mut c = job("c", Priority::NORMAL);
        // Identical timestamps fall back to enqueue order.
        a.created_at = base;
        b.created_at = base;
        c.created_at = base;

        state.enqueue(a);
        state.enqueue(b);
        state.enqueue(c);

        let now = Utc::now();
        let order: Vec<_> = std::iter::from_fn(|| state.dequeue(now)).collect();
        assert_eq!(names(&order), vec!["b", "a", "c"]);
        assert!(state.is_empty());
    }

    #[test]
    fn older_job_wins_within_priority() {
        let mut state = QueueActorState::new();
        let mut newer = job("newer", Priority::LOW);
        let mut older = job("older", Priority::LOW);
        older.created_at = Utc::now() - ChronoDuration::seconds(10);
        newer.created_at = Utc::now();

        state.enqueue(newer);
        state.enqueue(older);

        assert_eq!(state.dequeue(Utc::now()).unwrap().name, "older");
    }

    #[test]
    fn scheduled_job_waits_for_its_time() {
        let mut state = QueueActorState::new();
        let now = Utc::now();
        let at = now + ChronoDuration::seconds(60);
        state.enqueue_at(job("later", Priority::CRITICAL), at);
        state.enqueue(job("now", Priority::LOW));

        assert_eq!(state.len(), 2);
        assert_eq!(state.scheduled_jobs()[0].status, JobStatus::Scheduled);
        assert_eq!(state.scheduled_jobs()[0].scheduled_at, Some(at));

        assert_eq!(state.dequeue(now).unwrap().name, "now");
        assert!(state.dequeue(now).is_none());
        assert!(state.peek(at - ChronoDuration::milliseconds(1)).is_none());

        let promoted = state.dequeue(at).unwrap();
        assert_eq!(promoted.name, "later");
        assert_eq!(promoted.status, JobStatus::Queued);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut state = QueueActorState::new();
        state.enqueue(job("only", Priority::NORMAL));
        let now = Utc::now();
        assert_eq!(state.peek(now).unwrap().name, "only");
        assert_eq!(state.len(), 1);
        assert_eq!(state.dequeue(now).unwrap().name, "only");
    }

    #[test]
    fn remove_finds_ready_and_scheduled_jobs() {
        let mut state = QueueActorState::new();
        let ready = job("ready", Priority::NORMAL);
        let later = job("later", Priority::NORMAL);
        let (ready_id, later_id) = (ready.id, later.id);
        state.enqueue(ready);
        state.enqueue_at(later, Utc::now() + ChronoDuration::hours(1));

        assert!(state.remove(later_id));
        assert!(state.remove(ready_id));
        assert!(!state.remove(ready_id));
        assert!(state.is_empty());
    }

    #[test]
    fn introspection_lists_in_dispatch_order() {
        let mut state = QueueActorState::new();
        state.enqueue(job("low", Priority::LOW));
        state.enqueue(job("critical", Priority::CRITICAL));
        state.enqueue(job("normal", Priority::NORMAL));

        assert_eq!(
            names(&state.queued_jobs()),
            vec!["critical", "normal", "low"]
        );
    }

    #[tokio::test]
    async fn handle_round_trips_through_actor() {
        let (queue, handle) = QueueHandle::spawn(Duration::from_secs(1)).await.unwrap();

        assert!(matches!(queue.dequeue().await, Err(QueueError::Empty)));

        let first = job("first", Priority::NORMAL);
        let urgent = job("urgent", Priority::HIGH);
        let first_id = first.id;
        queue.enqueue(first).await.unwrap();
        queue.enqueue(urgent).await.unwrap();
        queue
            .enqueue_at(job("later", Priority::LOW), Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();

        assert_eq!(queue.size().await.unwrap(), 3);
        assert_eq!(queue.peek().await.unwrap().name, "urgent");
        assert_eq!(queue.scheduled_jobs().await.unwrap().len(), 1);
        assert_eq!(queue.queued_jobs().await.unwrap().len(), 2);

        queue.remove_job(first_id).await.unwrap();
        assert!(matches!(
            queue.remove_job(first_id).await,
            Err(QueueError::NotFound(_))
        ));
        assert_eq!(queue.dequeue().await.unwrap().name, "urgent");
        assert!(matches!(queue.dequeue().await, Err(QueueError::Empty)));
        queue.ping().await.unwrap();

        queue.shutdown();
        handle.await.unwrap();
        assert!(queue.ping().await.is_err());
    }
}
