//! Per-session event fan-out.
//!
//! The Supervisor owns one [`EventHub`]; the loop publishes every
//! [`StreamEvent`] it produces and any number of subscribers consume
//! them through bounded buffers.  A subscriber that falls behind is
//! dropped with a terminal `lag` notice — the loop is never blocked by
//! slow consumers.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use fm_domain::stream::StreamEvent;

/// A subscriber's receiving end.
pub type EventStream = mpsc::Receiver<StreamEvent>;

struct Subscriber {
    tx: mpsc::Sender<StreamEvent>,
}

/// Fan-out registry keyed by session id.
pub struct EventHub {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    buffer: usize,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a subscriber for a session.  Subscribers may register
    /// before the session starts or at any point during it.
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .push(Subscriber { tx });
        rx
    }

    /// Deliver an event to every subscriber of a session.
    ///
    /// Never blocks: a full buffer drops the subscriber.  The `lag`
    /// notice is sent from a detached task so delivery of it also never
    /// blocks the loop.
    pub fn publish(&self, session_id: &str, event: &StreamEvent) {
        let mut subscribers = self.subscribers.lock();
        let Some(entries) = subscribers.get_mut(session_id) else {
            return;
        };

        entries.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(session_id, "subscriber lagging; dropping");
                let tx = sub.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(StreamEvent::Lag { dropped: 1 }).await;
                });
                false
            }
        });

        if entries.is_empty() {
            subscribers.remove(session_id);
        }
    }

    /// Drop all subscribers of a session (after its terminal event).
    pub fn close(&self, session_id: &str) {
        self.subscribers.lock().remove(session_id);
    }

    /// Number of live subscribers for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .get(session_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_domain::stream::{StopReason, Usage};

    fn text(t: &str) -> StreamEvent {
        StreamEvent::TextDelta { text: t.into() }
    }

    #[tokio::test]
    async fn events_delivered_in_order() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe("s1");

        hub.publish("s1", &text("a"));
        hub.publish("s1", &text("b"));

        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::TextDelta { text } if text == "a"));
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::TextDelta { text } if text == "b"));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_events() {
        let hub = EventHub::new(16);
        let mut rx1 = hub.subscribe("s1");
        let mut rx2 = hub.subscribe("s1");

        hub.publish("s1", &text("x"));
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn slow_subscriber_dropped_with_lag() {
        let hub = EventHub::new(2);
        let mut rx = hub.subscribe("s1");

        // Fill the buffer and overflow it.
        hub.publish("s1", &text("1"));
        hub.publish("s1", &text("2"));
        hub.publish("s1", &text("3")); // overflow: dropped + lag queued

        assert_eq!(hub.subscriber_count("s1"), 0);

        // Buffered events drain first, then the lag notice, then EOF.
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::TextDelta { .. }));
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::TextDelta { .. }));
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Lag { .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_to_unknown_session_is_noop() {
        let hub = EventHub::new(4);
        hub.publish("ghost", &text("x"));
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let hub = EventHub::new(4);
        let mut rx = hub.subscribe("s1");
        hub.publish(
            "s1",
            &StreamEvent::StepEnd {
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
                error: None,
            },
        );
        hub.close("s1");

        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::StepEnd { .. }));
        assert!(rx.recv().await.is_none());
    }
}
