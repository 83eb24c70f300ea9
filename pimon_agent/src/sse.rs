//! Server-Sent Events endpoints. Each connection owns one bus subscription for
//! its lifetime and streams every event it receives.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::bus::{EventBus, SubscriberHandle, Subscription, Topic};
use crate::event::StreamEvent;
use crate::state::AppState;

pub async fn metrics_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stream_topic(&state, Topic::Metrics)
}

pub async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stream_topic(&state, Topic::Logs)
}

/// Frames one bus event for the wire.
pub fn to_sse(event: &StreamEvent) -> Event {
    let frame = Event::default();
    let frame = match event.kind.name() {
        Some(name) => frame.event(name),
        None => frame,
    };
    // SSE cannot carry carriage returns.
    let data: &str = &event.data;
    if data.contains('\r') {
        frame.data(data.replace('\r', ""))
    } else {
        frame.data(data)
    }
}

// Unsubscribes when the response stream is dropped, which is how axum
// reports a closed connection.
struct SubscriptionGuard {
    bus: Arc<EventBus>,
    handle: SubscriberHandle,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.bus.unsubscribe(&self.handle) {
            debug!(topic = %self.handle.topic(), subscriber = self.handle.id(), "stream closed");
        }
    }
}

fn stream_topic(
    state: &AppState,
    topic: Topic,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sub = state.bus.subscribe(topic);
    let guard = SubscriptionGuard {
        bus: Arc::clone(&state.bus),
        handle: sub.handle(),
    };
    debug!(%topic, subscriber = guard.handle.id(), "stream opened");

    let hello = stream::once(async { Ok::<_, Infallible>(Event::default().comment("ok")) });
    let events = stream::unfold(
        (sub, guard),
        |(mut sub, guard): (Subscription, SubscriptionGuard)| async move {
            let event = sub.recv().await?;
            Some((Ok::<_, Infallible>(to_sse(&event)), (sub, guard)))
        },
    );
    Sse::new(hello.chain(events)).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn frames_carry_event_name_and_stripped_data() {
        // axum panics on '\r' in data, so this also guards the stripping.
        let frame = format!("{:?}", to_sse(&StreamEvent::new(EventKind::Stderr, "50%\r75%")));
        assert!(frame.contains("event: stderr"), "{frame}");
        assert!(frame.contains("data: 50%75%"), "{frame}");
        assert!(!frame.contains("\\r"), "{frame}");
    }

    #[test]
    fn plain_data_has_no_event_line() {
        let frame = format!("{:?}", to_sse(&StreamEvent::new(EventKind::Data, "{}")));
        assert!(frame.contains("data: {}"), "{frame}");
        assert!(!frame.contains("event:"), "{frame}");
    }
}
