use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::wire::STREAM_RESPONSE_EVENT;

/// Fan-out point for one backend event name.
///
/// Backends emit raw JSON payloads here; every live [`StreamSubscription`]
/// receives each payload in emission order.
pub struct EventHub {
    event: &'static str,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<serde_json::Value>>>,
}

impl EventHub {
    pub fn new(event: &'static str) -> Arc<Self> {
        Arc::new(Self {
            event,
            next_subscriber_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    pub fn stream_response() -> Arc<Self> {
        Self::new(STREAM_RESPONSE_EVENT)
    }

    pub fn subscribe(self: &Arc<Self>) -> StreamSubscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, event_tx);

        tracing::debug!(event = self.event, subscriber_id = id, "event listener registered");

        StreamSubscription {
            id,
            events: event_rx,
            hub: Some(Arc::downgrade(self)),
        }
    }

    /// Delivers `payload` to every live subscriber and returns how many received it.
    pub fn emit(&self, payload: serde_json::Value) -> usize {
        let mut subscribers = self.subscribers.lock();
        // Receivers dropped without unsubscribing are pruned here.
        subscribers.retain(|_, sender| sender.send(payload.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn release(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            tracing::debug!(event = self.event, subscriber_id = id, "event listener released");
        }
    }
}

/// Scoped handle for one event listener.
///
/// The listener stays registered until [`StreamSubscription::unsubscribe`] is
/// called or the handle is dropped, whichever happens first.
pub struct StreamSubscription {
    id: u64,
    events: mpsc::UnboundedReceiver<serde_json::Value>,
    hub: Option<Weak<EventHub>>,
}

impl StreamSubscription {
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<serde_json::Value> {
        self.events.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        self.hub.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(hub) = self.hub.take().and_then(|hub| hub.upgrade()) {
            hub.release(self.id);
        }
        self.events.close();
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_payloads_in_emission_order() {
        let hub = EventHub::stream_response();
        let mut subscription = hub.subscribe();

        hub.emit(serde_json::json!("Hel"));
        hub.emit(serde_json::json!("lo"));

        assert_eq!(subscription.recv().await, Some(serde_json::json!("Hel")));
        assert_eq!(subscription.try_recv(), Some(serde_json::json!("lo")));
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn unsubscribe_and_drop_both_release_the_listener() {
        let hub = EventHub::stream_response();
        let first = hub.subscribe();
        let second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(second);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.emit(serde_json::json!("late")), 0);
    }

    #[test]
    fn subscription_outliving_hub_releases_quietly() {
        let hub = EventHub::stream_response();
        let subscription = hub.subscribe();
        drop(hub);
        assert!(subscription.is_active());
        subscription.unsubscribe();
    }
}
