//! # Event Bus - Server Push Distribution
//!
//! ## Purpose
//!
//! Topic-keyed publish/subscribe for messages the gateway pushes without
//! being asked. The topic is the numeric payload type, so a subscription
//! survives any renaming on the caller side and lookups stay integer keyed.
//!
//! ## Subscription Modes
//!
//! - **Persistent**: [`EventBus::subscribe`] registers a handler until
//!   [`EventBus::unsubscribe`] removes exactly that handler.
//! - **One-shot**: [`EventBus::listen_once`] hands back a receiver that
//!   resolves with the next event on the topic and is then forgotten.
//!
//! ## Delivery
//!
//! Handlers run synchronously on the publishing task, in subscription
//! order. A panicking handler is logged and skipped; the remaining
//! handlers and the publisher carry on.

use chrono::{DateTime, Utc};
use codec::{DecodedMessage, Fields};
use dashmap::DashMap;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Record delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerEvent {
    pub payload_type: u32,
    pub payload_name: String,
    /// When the frame was dispatched
    pub timestamp: DateTime<Utc>,
    pub fields: Fields,
    pub client_msg_id: Option<String>,
}

impl BrokerEvent {
    pub fn new(payload_type: u32, payload_name: impl Into<String>, fields: Fields) -> Self {
        Self {
            payload_type,
            payload_name: payload_name.into(),
            timestamp: Utc::now(),
            fields,
            client_msg_id: None,
        }
    }
}

impl From<DecodedMessage> for BrokerEvent {
    fn from(message: DecodedMessage) -> Self {
        Self {
            payload_type: message.payload_type,
            payload_name: message.payload_name,
            timestamp: Utc::now(),
            fields: message.fields,
            client_msg_id: message.client_msg_id,
        }
    }
}

/// Subscriber callback
pub type EventHandler = Arc<dyn Fn(&BrokerEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Topic registry for server-pushed messages
#[derive(Default)]
pub struct EventBus {
    /// Map of payload types to handlers, in subscription order
    subscribers: DashMap<u32, Vec<Subscription>>,
    /// Reverse mapping: subscription to topic
    subscription_topics: DashMap<SubscriptionId, u32>,
    /// One-shot listeners, drained by the next publish on their topic
    waiters: DashMap<u32, Vec<oneshot::Sender<BrokerEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future event on `topic`
    pub fn subscribe<F>(&self, topic: u32, handler: F) -> SubscriptionId
    where
        F: Fn(&BrokerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.entry(topic).or_default().push(Subscription {
            id,
            handler: Arc::new(handler),
        });
        self.subscription_topics.insert(id, topic);

        debug!(topic, subscription = id.0, "Subscribed");
        id
    }

    /// Remove exactly the handler behind `id`; false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, topic)) = self.subscription_topics.remove(&id) else {
            return false;
        };

        let mut removed = false;
        if let Some(mut subscriptions) = self.subscribers.get_mut(&topic) {
            let before = subscriptions.len();
            subscriptions.retain(|s| s.id != id);
            removed = subscriptions.len() < before;
        }
        self.subscribers.remove_if(&topic, |_, subscriptions| subscriptions.is_empty());

        debug!(topic, subscription = id.0, "Unsubscribed");
        removed
    }

    /// Resolve with the next event on `topic`
    ///
    /// Listeners whose receiver was dropped are pruned here as well as on
    /// publish, so quiet topics do not accumulate them.
    pub fn listen_once(&self, topic: u32) -> oneshot::Receiver<BrokerEvent> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.entry(topic).or_default();
        waiters.retain(|waiter| !waiter.is_closed());
        waiters.push(tx);
        rx
    }

    /// Deliver `event` to every handler and pending listener of its topic
    ///
    /// Returns the number of successful deliveries.
    pub fn publish(&self, event: &BrokerEvent) -> usize {
        let topic = event.payload_type;

        // Snapshot so handlers may subscribe or unsubscribe while running
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .subscribers
            .get(&topic)
            .map(|subs| subs.iter().map(|s| (s.id, s.handler.clone())).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    topic,
                    payload_name = %event.payload_name,
                    subscription = id.0,
                    "Event handler panicked"
                ),
            }
        }

        if let Some((_, waiters)) = self.waiters.remove(&topic) {
            for waiter in waiters {
                if waiter.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        if delivered == 0 {
            debug!(topic, payload_name = %event.payload_name, "Event had no listeners");
        }
        delivered
    }

    /// Persistent handlers currently registered on `topic`
    pub fn subscriber_count(&self, topic: u32) -> usize {
        self.subscribers.get(&topic).map(|s| s.len()).unwrap_or(0)
    }

    /// One-shot listeners still waiting on `topic`
    pub fn waiter_count(&self, topic: u32) -> usize {
        self.waiters
            .get(&topic)
            .map(|w| w.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn spot(symbol: &str) -> BrokerEvent {
        let mut fields = Fields::new();
        fields.insert("symbol".into(), symbol.into());
        BrokerEvent::new(6, "SpotEVENT", fields)
    }

    #[test]
    fn test_publish_reaches_only_matching_topic() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe(6, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(7, |_| panic!("wrong topic"));

        assert_eq!(bus.publish(&spot("BTCUSD")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_removes_exactly_one_handler() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            bus.subscribe(6, move |_| seen.lock().push("first"))
        };
        {
            let seen = seen.clone();
            bus.subscribe(6, move |_| seen.lock().push("second"));
        }

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.publish(&spot("EURUSD"));

        assert_eq!(*seen.lock(), vec!["second"]);
        assert_eq!(bus.subscriber_count(6), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(6, |_| panic!("handler bug"));
        let counter = hits.clone();
        bus.subscribe(6, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&spot("XAUUSD")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listen_once_fires_once() {
        let bus = EventBus::new();
        let next = bus.listen_once(6);
        assert_eq!(bus.waiter_count(6), 1);

        bus.publish(&spot("BTCUSD"));
        bus.publish(&spot("ETHUSD"));

        let event = next.await.unwrap();
        assert_eq!(event.fields.get("symbol").and_then(|s| s.as_str()), Some("BTCUSD"));
        assert_eq!(bus.waiter_count(6), 0);
    }

    #[test]
    fn test_abandoned_listeners_are_pruned() {
        let bus = EventBus::new();
        for _ in 0..3 {
            drop(bus.listen_once(7));
        }
        let _live = bus.listen_once(7);

        assert_eq!(bus.waiters.get(&7).map(|w| w.len()), Some(1));
        assert_eq!(bus.waiter_count(7), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let id = {
            let bus = bus.clone();
            let slot = slot.clone();
            let hits = hits.clone();
            bus.clone().subscribe(6, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = slot.lock().take() {
                    bus.unsubscribe(id);
                }
            })
        };
        *slot.lock() = Some(id);

        bus.publish(&spot("A"));
        bus.publish(&spot("B"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
