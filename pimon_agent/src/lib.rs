//! Library surface for pimon_agent: host telemetry and subprocess log
//! streaming over Server-Sent Events.

pub mod bus;
pub mod config;
pub mod event;
pub mod metrics;
pub mod relay;
pub mod sampler;
pub mod server;
pub mod sse;
pub mod state;
pub mod types;

pub use bus::{EventBus, SubscriberHandle, Subscription, Topic};
pub use event::{EventKind, StreamEvent};
pub use state::AppState;
