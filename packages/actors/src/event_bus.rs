//! In-process fan-out of job lifecycle events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use job_core::{JobEvent, JobEventType, JobId, Storage};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Identifier handed out by [`EventBus::subscribe`].
pub type SubscriptionId = u64;

/// A live feed of events. Dropping it releases the channel.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<JobEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the bus is closed or the subscription removed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        self.rx.try_recv().ok()
    }
}

/// Best-effort publish/subscribe for [`JobEvent`]s.
///
/// Delivery is at-most-once per subscriber; a slow subscriber loses
/// events instead of slowing down publishers.
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: JobEvent);

    /// Subscribe to the given event types. An empty slice means all types.
    fn subscribe(&self, types: &[JobEventType]) -> Subscription;

    /// Subscribe to every event of a single job.
    fn subscribe_to_job(&self, job_id: JobId) -> Subscription;

    fn unsubscribe(&self, id: SubscriptionId);

    /// End every subscription. Later subscriptions start closed.
    fn close(&self);

    fn active_subscriptions(&self) -> usize;

    fn stats(&self) -> EventBusStats;
}

/// Point-in-time counters of an [`EventBus`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventBusStats {
    pub active_subscriptions: usize,
    pub global_subscriptions: usize,
    pub job_subscriptions: usize,
    pub events_published: u64,
    /// Deliveries lost to full subscriber buffers.
    pub events_dropped: u64,
}

struct TypeSubscriber {
    types: HashSet<JobEventType>,
    tx: mpsc::Sender<JobEvent>,
}

struct JobSubscriber {
    job_id: JobId,
    tx: mpsc::Sender<JobEvent>,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    by_type: HashMap<SubscriptionId, TypeSubscriber>,
    by_job: HashMap<SubscriptionId, JobSubscriber>,
}

/// [`EventBus`] backed by one bounded channel per subscriber.
pub struct MemoryEventBus {
    state: RwLock<BusState>,
    buffer: usize,
    next_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl MemoryEventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: RwLock::new(BusState::default()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn channel(&self) -> (SubscriptionId, mpsc::Sender<JobEvent>, Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        (id, tx, Subscription { id, rx })
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

enum Delivery {
    Sent,
    Dropped,
    Gone,
}

/// Deliver without blocking.
fn deliver(id: SubscriptionId, tx: &mpsc::Sender<JobEvent>, event: &JobEvent) -> Delivery {
    match tx.try_send(event.clone()) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => {
            tracing::debug!(
                subscription = id,
                job_id = %event.job_id,
                event_type = %event.event_type,
                "Subscriber buffer full, dropping event"
            );
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => Delivery::Gone,
    }
}

impl EventBus for MemoryEventBus {
    fn publish(&self, event: JobEvent) {
        let mut gone = Vec::new();
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return;
            }
            self.published.fetch_add(1, Ordering::Relaxed);

            let global = state
                .by_type
                .iter()
                .filter(|(_, sub)| sub.types.is_empty() || sub.types.contains(&event.event_type))
                .map(|(id, sub)| (*id, &sub.tx));
            let per_job = state
                .by_job
                .iter()
                .filter(|(_, sub)| sub.job_id == event.job_id)
                .map(|(id, sub)| (*id, &sub.tx));

            for (id, tx) in global.chain(per_job) {
                match deliver(id, tx, &event) {
                    Delivery::Sent => {}
                    Delivery::Dropped => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Gone => gone.push(id),
                }
            }
        }

        if !gone.is_empty() {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for id in gone {
                state.by_type.remove(&id);
                state.by_job.remove(&id);
            }
        }
    }

    fn subscribe(&self, types: &[JobEventType]) -> Subscription {
        let (id, tx, subscription) = self.channel();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            state.by_type.insert(
                id,
                TypeSubscriber {
                    types: types.iter().copied().collect(),
                    tx,
                },
            );
        }
        subscription
    }

    fn subscribe_to_job(&self, job_id: JobId) -> Subscription {
        let (id, tx, subscription) = self.channel();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            state.by_job.insert(id, JobSubscriber { job_id, tx });
        }
        subscription
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.by_type.remove(&id);
        state.by_job.remove(&id);
    }

    fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.by_type.clear();
        state.by_job.clear();
    }

    fn active_subscriptions(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_type.len() + state.by_job.len()
    }

    fn stats(&self) -> EventBusStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        EventBusStats {
            active_subscriptions: state.by_type.len() + state.by_job.len(),
            global_subscriptions: state.by_type.len(),
            job_subscriptions: state.by_job.len(),
            events_published: self.published.load(Ordering::Relaxed),
            events_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Persist an event for audit, then broadcast it. Neither step fails the caller.
pub async fn emit(storage: &dyn Storage, bus: &dyn EventBus, event: JobEvent) {
    if let Err(e) = storage.save_job_event(&event).await {
        tracing::warn!(job_id = %event.job_id, error = %e, "Failed to persist job event");
    }
    tracing::debug!("{}", event.description());
    bus.publish(event);
}
