//! Metrics ticker: samples the snapshot source on a fixed period and publishes
//! each result (or its failure) on the `metrics` topic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use crate::bus::{EventBus, Topic};
use crate::event::StreamEvent;
use crate::metrics::{SnapshotError, SnapshotSource};
use crate::types::Snapshot;

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(2000);
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Last serialized snapshot, shared with the request/response endpoint.
pub type LatestJson = Arc<RwLock<Option<Arc<str>>>>;

pub struct MetricsTicker {
    bus: Arc<EventBus>,
    source: Arc<dyn SnapshotSource>,
    period: Duration,
    snapshot_timeout: Duration,
    latest: Option<LatestJson>,
    in_flight: Arc<AtomicBool>,
}

// Clears the in-flight flag when the blocking read returns or unwinds.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MetricsTicker {
    pub fn new(bus: Arc<EventBus>, source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            bus,
            source,
            period: DEFAULT_PERIOD,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            latest: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    pub fn with_timeout(mut self, snapshot_timeout: Duration) -> Self {
        self.snapshot_timeout = snapshot_timeout;
        self
    }

    pub fn with_cache(mut self, latest: LatestJson) -> Self {
        self.latest = Some(latest);
        self
    }

    // A timed-out read keeps its blocking thread until the source returns, so
    // at most one read is outstanding; ticks in the meantime report `Busy`.
    async fn read_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(SnapshotError::Busy);
        }
        let guard = InFlight(Arc::clone(&self.in_flight));
        let source = Arc::clone(&self.source);
        let read = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            source.snapshot()
        });
        match timeout(self.snapshot_timeout, read).await {
            Ok(Ok(res)) => res,
            Ok(Err(join)) => Err(SnapshotError::Task(join.to_string())),
            Err(_) => Err(SnapshotError::Timeout(self.snapshot_timeout)),
        }
    }

    /// Runs one sample-and-publish cycle; returns the published event.
    pub async fn tick(&self) -> StreamEvent {
        let event = match self.read_snapshot().await {
            Ok(snapshot) => match StreamEvent::snapshot(&snapshot) {
                Ok(event) => event,
                Err(e) => StreamEvent::error(format!("failed to serialize snapshot: {e}")),
            },
            Err(e) => {
                warn!("snapshot failed: {e}");
                StreamEvent::error(e.to_string())
            }
        };
        if !event.is_error() {
            if let Some(latest) = &self.latest {
                *latest.write().await = Some(Arc::clone(&event.data));
            }
        }
        let delivered = self.bus.publish(Topic::Metrics, event.clone());
        debug!(delivered, error = event.is_error(), "published metrics");
        event
    }

    /// Spawns the ticker. The first tick fires immediately; the task runs
    /// until aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = interval(self.period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                self.tick().await;
            }
        })
    }
}
