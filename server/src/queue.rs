use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use shared::ActivityEvent;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

/// Interactive-facing ingest runs at Medium so batch replay never
/// starves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Medium = 1,
    Low = 2,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: ActivityEvent,
    pub priority: Priority,
    /// 1 on first delivery, bumped on every redelivery.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: ActivityEvent,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
#[error("queue is at capacity ({0})")]
pub struct QueueFull(pub usize);

struct InFlight {
    event: ActivityEvent,
    priority: Priority,
    attempt: u32,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    ready: [VecDeque<(ActivityEvent, u32)>; 3],
    in_flight: HashMap<Uuid, InFlight>,
    dead: Vec<DeadLetter>,
}

impl Inner {
    fn ready_len(&self) -> usize {
        self.ready.iter().map(VecDeque::len).sum()
    }
}

/// In-process queue with at-least-once semantics: leased events that are
/// neither acked nor nacked before the visibility timeout are redelivered,
/// which covers workers that crash mid-event.
pub struct ActivityQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    visibility_timeout: Duration,
}

impl ActivityQueue {
    pub fn new(capacity: usize, visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            capacity,
            visibility_timeout,
        }
    }

    pub fn push(&self, event: ActivityEvent, priority: Priority) -> Result<(), QueueFull> {
        self.push_attempt(event, priority, 1)
    }

    fn push_attempt(
        &self,
        event: ActivityEvent,
        priority: Priority,
        attempt: u32,
    ) -> Result<(), QueueFull> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.ready_len() + inner.in_flight.len() >= self.capacity {
                return Err(QueueFull(self.capacity));
            }
            inner.ready[priority as usize].push_back((event, attempt));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Waits until an event is available and leases it.
    pub async fn pop(&self) -> Delivery {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_pop() {
                return delivery;
            }
            // Wake on push/nack or on a tick so expired leases get
            // reclaimed even while the queue is otherwise quiet.
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.visibility_timeout / 4) => {}
            }
        }
    }

    fn try_pop(&self) -> Option<Delivery> {
        let mut inner = self.inner.lock().unwrap();

        // Reclaim leases that outlived their visibility timeout
        let now = Instant::now();
        let expired: Vec<Uuid> = inner
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let lease = inner.in_flight.remove(&id).unwrap();
            warn!(activity_id = %id, "visibility timeout expired, redelivering");
            inner.ready[lease.priority as usize].push_back((lease.event, lease.attempt + 1));
        }

        for (idx, priority) in [Priority::High, Priority::Medium, Priority::Low]
            .into_iter()
            .enumerate()
        {
            if let Some((event, attempt)) = inner.ready[idx].pop_front() {
                inner.in_flight.insert(
                    event.id,
                    InFlight {
                        event: event.clone(),
                        priority,
                        attempt,
                        deadline: now + self.visibility_timeout,
                    },
                );
                return Some(Delivery {
                    event,
                    priority,
                    attempt,
                });
            }
        }
        None
    }

    pub fn ack(&self, activity_id: Uuid) {
        self.inner.lock().unwrap().in_flight.remove(&activity_id);
    }

    /// Returns the event to the queue for later redelivery.
    pub fn nack(&self, activity_id: Uuid) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(lease) = inner.in_flight.remove(&activity_id) {
                inner.ready[lease.priority as usize].push_back((lease.event, lease.attempt + 1));
            }
        }
        self.notify.notify_one();
    }

    pub fn dead_letter(&self, activity_id: Uuid, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(lease) = inner.in_flight.remove(&activity_id) {
            inner.dead.push(DeadLetter {
                event: lease.event,
                reason: reason.to_string(),
            });
        }
    }

    /// Events waiting for a worker, leases excluded.
    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap().ready_len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().unwrap().dead.clone()
    }
}
