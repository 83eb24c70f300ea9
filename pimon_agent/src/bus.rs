//! Event bus: per-topic subscriber registry with non-blocking fan-out.
//!
//! Every subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: a full or closed queue gets that subscriber dropped from the
//! registry while the remaining subscribers still receive the event.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::event::StreamEvent;

/// Queue depth per subscriber when none is configured.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Metrics,
    Logs,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Metrics, Topic::Logs];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Metrics => "metrics",
            Topic::Logs => "logs",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one registered subscriber. Cheap to copy; holds no resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle {
    id: u64,
    topic: Topic,
}

impl SubscriberHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Receiving side of a subscription. Yields `None` once the subscriber has
/// been removed from the bus and its queue is drained.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriberHandle,
    rx: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriberHandle {
        self.handle
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

type Registry = HashMap<u64, mpsc::Sender<StreamEvent>>;

pub struct EventBus {
    metrics: Mutex<Registry>,
    logs: Mutex<Registry>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    // A panic while holding the lock cannot leave a half-applied membership
    // change (each mutation is a single map operation), so poisoning is ignored.
    fn registry(&self, topic: Topic) -> MutexGuard<'_, Registry> {
        let lock = match topic {
            Topic::Metrics => &self.metrics,
            Topic::Logs => &self.logs,
        };
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let count = {
            let mut subs = self.registry(topic);
            subs.insert(id, tx);
            subs.len()
        };
        debug!(%topic, subscriber = id, count, "subscribed");
        Subscription {
            handle: SubscriberHandle { id, topic },
            rx,
        }
    }

    /// Removes the subscriber if it is still registered. Returns whether this
    /// call removed it; repeated calls are no-ops.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) -> bool {
        let removed = self.registry(handle.topic).remove(&handle.id).is_some();
        if removed {
            debug!(topic = %handle.topic, subscriber = handle.id, "unsubscribed");
        }
        removed
    }

    /// Delivers `event` to every subscriber of `topic` and returns how many
    /// received it. Lagging or closed subscribers are dropped.
    pub fn publish(&self, topic: Topic, event: StreamEvent) -> usize {
        let mut delivered = 0;
        let mut subs = self.registry(topic);
        subs.retain(|id, sink| match sink.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(%topic, subscriber = *id, "subscriber queue full, dropping subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%topic, subscriber = *id, "subscriber gone");
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry(topic).len()
    }

    /// Drops every subscriber on every topic, ending their streams.
    pub fn close(&self) {
        for topic in Topic::ALL {
            let dropped = {
                let mut subs = self.registry(topic);
                let n = subs.len();
                subs.clear();
                n
            };
            if dropped > 0 {
                debug!(%topic, dropped, "closed topic");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("metrics", &self.subscriber_count(Topic::Metrics))
            .field("logs", &self.subscriber_count(Topic::Logs))
            .field("buffer", &self.buffer)
            .finish()
    }
}
