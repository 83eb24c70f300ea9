//! Shared agent state: the event bus, the log relay and the hot JSON cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::bus::EventBus;
use crate::relay::LogRelay;
use crate::sampler::LatestJson;

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub relay: Arc<LogRelay>,

    // Last serialized snapshot for GET /metrics
    pub last_json: LatestJson,

    pub keep_alive: Duration,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(bus: Arc<EventBus>, relay: Arc<LogRelay>) -> Self {
        Self {
            bus,
            relay,
            last_json: Arc::new(RwLock::new(None)),
            keep_alive: Duration::from_secs(15),
            static_dir: None,
        }
    }
}
