//! Registry of in-flight jobs and their stop signals.
//!
//! A job is either waiting (no entry), running in a worker, finishing (the
//! worker is persisting its outcome) or tombstoned (stopped before a worker
//! picked it up). Whoever stops a job owns its terminal status; the worker
//! only records outcomes for jobs nobody stopped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use job_core::{JobId, JobStatus};
use tokio_util::sync::CancellationToken;

/// Why a job was stopped from outside its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TimedOut,
}

impl StopReason {
    /// Terminal status the stopping party records.
    pub fn status(self) -> JobStatus {
        match self {
            StopReason::Cancelled => JobStatus::Cancelled,
            StopReason::TimedOut => JobStatus::Timeout,
        }
    }
}

/// Result of [`ActiveJobs::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A worker was running the job and its token has been cancelled.
    Signalled,
    /// No worker holds the job; a tombstone keeps one from starting it.
    NotActive,
    /// The worker already has an outcome and is recording it.
    Finishing,
    /// Someone else stopped the job first.
    AlreadyStopped(StopReason),
}

#[derive(Debug)]
enum Entry {
    Running {
        token: CancellationToken,
        stop: Option<StopReason>,
    },
    Finishing,
    Tombstone(StopReason),
}

#[derive(Debug, Default)]
pub struct ActiveJobs {
    jobs: Mutex<HashMap<JobId, Entry>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a job for a worker. `None` means it was stopped or is already
    /// held, and must not run.
    pub fn register(&self, id: JobId) -> Option<CancellationToken> {
        let mut jobs = self.lock();
        match jobs.get(&id) {
            Some(Entry::Tombstone(_)) => {
                jobs.remove(&id);
                None
            }
            Some(_) => None,
            None => {
                let token = CancellationToken::new();
                jobs.insert(
                    id,
                    Entry::Running {
                        token: token.clone(),
                        stop: None,
                    },
                );
                Some(token)
            }
        }
    }

    /// Stop a job. The first stop wins.
    pub fn stop(&self, id: JobId, reason: StopReason) -> StopOutcome {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(Entry::Running { stop: Some(prev), .. }) => StopOutcome::AlreadyStopped(*prev),
            Some(Entry::Running { token, stop }) => {
                *stop = Some(reason);
                token.cancel();
                StopOutcome::Signalled
            }
            Some(Entry::Finishing) => StopOutcome::Finishing,
            Some(Entry::Tombstone(prev)) => StopOutcome::AlreadyStopped(*prev),
            None => {
                jobs.insert(id, Entry::Tombstone(reason));
                StopOutcome::NotActive
            }
        }
    }

    /// Called by the worker once execution returns. A stopped job is
    /// released immediately and its reason returned; otherwise the job
    /// moves to finishing until [`release`](Self::release).
    pub fn finish(&self, id: JobId) -> Option<StopReason> {
        let mut jobs = self.lock();
        match jobs.get(&id) {
            Some(Entry::Running { stop: Some(reason), .. }) => {
                let reason = *reason;
                jobs.remove(&id);
                Some(reason)
            }
            Some(Entry::Running { stop: None, .. }) => {
                jobs.insert(id, Entry::Finishing);
                None
            }
            _ => None,
        }
    }

    /// Drop a finishing entry once the outcome is persisted.
    pub fn release(&self, id: JobId) {
        let mut jobs = self.lock();
        if matches!(jobs.get(&id), Some(Entry::Finishing)) {
            jobs.remove(&id);
        }
    }

    /// Remove a tombstone that no worker will consume.
    pub fn clear_tombstone(&self, id: JobId) {
        let mut jobs = self.lock();
        if matches!(jobs.get(&id), Some(Entry::Tombstone(_))) {
            jobs.remove(&id);
        }
    }

    /// Jobs currently held by workers.
    pub fn running(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| !matches!(e, Entry::Tombstone(_)))
            .count()
    }

    pub fn is_running(&self, id: JobId) -> bool {
        matches!(self.lock().get(&id), Some(Entry::Running { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signals_running_job_once() {
        let active = ActiveJobs::new();
        let id = JobId::new();
        let token = active.register(id).unwrap();
        assert!(active.register(id).is_none());
        assert_eq!(active.running(), 1);

        assert_eq!(active.stop(id, StopReason::TimedOut), StopOutcome::Signalled);
        assert!(token.is_cancelled());
        assert_eq!(
            active.stop(id, StopReason::Cancelled),
            StopOutcome::AlreadyStopped(StopReason::TimedOut)
        );

        assert_eq!(active.finish(id), Some(StopReason::TimedOut));
        assert_eq!(active.running(), 0);
    }

    #[test]
    fn tombstone_blocks_the_next_register() {
        let active = ActiveJobs::new();
        let id = JobId::new();

        assert_eq!(active.stop(id, StopReason::Cancelled), StopOutcome::NotActive);
        assert!(active.register(id).is_none());
        // The tombstone is consumed; a later attempt may run.
        assert!(active.register(id).is_some());
    }

    #[test]
    fn cleared_tombstone_does_not_linger() {
        let active = ActiveJobs::new();
        let id = JobId::new();
        active.stop(id, StopReason::Cancelled);
        active.clear_tombstone(id);
        assert!(active.register(id).is_some());
    }

    #[test]
    fn finishing_job_cannot_be_stopped() {
        let active = ActiveJobs::new();
        let id = JobId::new();
        active.register(id).unwrap();

        assert_eq!(active.finish(id), None);
        assert_eq!(active.stop(id, StopReason::Cancelled), StopOutcome::Finishing);
        assert_eq!(active.running(), 1);

        active.release(id);
        assert_eq!(active.running(), 0);
        assert!(!active.is_running(id));
    }
}
