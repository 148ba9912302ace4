#![deny(missing_docs)]
//! In-process event fan-out for the ArmorClaw bridge.
//!
//! The zero-trust gate publishes validated [`RoomEvent`]s here; RPC
//! clients and internal tasks subscribe with a [`SubscriptionFilter`].
//! Each subscriber owns a bounded queue. When a queue is full the bus
//! drops the newest event for that subscriber and counts the drop;
//! the producer never blocks on a slow consumer.
//!
//! Subscribers that stay silent past the idle window are reaped on the
//! next [`EventBus::reap_idle`] pass; the bridge runs that pass on a
//! timer.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use armorclaw_types::{RoomEvent, SubscriberId};

/// Errors from the event bus.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    /// The configured subscriber cap is reached.
    #[error("subscriber limit reached ({0})")]
    SubscriberLimit(usize),

    /// No subscriber with the given ID.
    #[error("unknown subscriber: {0}")]
    UnknownSubscriber(String),
}

/// What a subscriber wants to see. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Only events from this room.
    pub room_id: Option<String>,
    /// Only events from this sender.
    pub sender_id: Option<String>,
    /// Only these event types.
    pub event_types: Vec<String>,
}

impl SubscriptionFilter {
    fn matches(&self, event: &RoomEvent) -> bool {
        if let Some(ref room) = self.room_id {
            if event.room_id.as_str() != room {
                return false;
            }
        }
        if let Some(ref sender) = self.sender_id {
            if event.sender.as_str() != sender {
                return false;
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        true
    }
}

/// A live subscription: the ID to manage it by and the queue to drain.
pub struct Subscription {
    /// Handle for unsubscribe/touch/stats.
    pub id: SubscriberId,
    /// The bounded event queue.
    pub receiver: mpsc::Receiver<RoomEvent>,
}

/// Counters the bus maintains.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Events delivered across all subscribers.
    pub delivered: u64,
    /// Events dropped because a queue was full.
    pub dropped: u64,
    /// Subscribers reaped for inactivity.
    pub reaped: u64,
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-subscriber queue capacity.
    pub queue_capacity: usize,
    /// Cap on concurrent subscribers.
    pub max_subscribers: usize,
    /// Subscribers silent past this window are reaped.
    pub idle_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_subscribers: 128,
            idle_timeout: Duration::minutes(15),
        }
    }
}

struct SubscriberSlot {
    filter: SubscriptionFilter,
    sender: mpsc::Sender<RoomEvent>,
    last_activity: DateTime<Utc>,
    dropped: u64,
}

struct BusState {
    subscribers: HashMap<SubscriberId, SubscriberSlot>,
    next_id: u64,
    delivered: u64,
    dropped: u64,
    reaped: u64,
}

/// The fan-out hub.
pub struct EventBus {
    config: BusConfig,
    state: Mutex<BusState>,
}

impl EventBus {
    /// Create a bus with the given configuration.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BusState {
                subscribers: HashMap::new(),
                next_id: 1,
                delivered: 0,
                dropped: 0,
                reaped: 0,
            }),
        }
    }

    /// Register a subscriber. Fails when the cap is reached.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, BusError> {
        let mut state = self.state.lock().expect("bus lock");
        if state.subscribers.len() >= self.config.max_subscribers {
            return Err(BusError::SubscriberLimit(self.config.max_subscribers));
        }
        let id = SubscriberId::from_index(state.next_id);
        state.next_id += 1;
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        state.subscribers.insert(
            id.clone(),
            SubscriberSlot {
                filter,
                sender,
                last_activity: Utc::now(),
                dropped: 0,
            },
        );
        debug!(subscriber = %id, "subscribed");
        Ok(Subscription { id, receiver })
    }

    /// Remove a subscriber. Its queue closes once drained.
    pub fn unsubscribe(&self, id: &SubscriberId) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("bus lock");
        state
            .subscribers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BusError::UnknownSubscriber(id.to_string()))
    }

    /// Mark a subscriber as alive, resetting its idle clock.
    pub fn touch(&self, id: &SubscriberId) -> Result<(), BusError> {
        let mut state = self.state.lock().expect("bus lock");
        let slot = state
            .subscribers
            .get_mut(id)
            .ok_or_else(|| BusError::UnknownSubscriber(id.to_string()))?;
        slot.last_activity = Utc::now();
        Ok(())
    }

    /// Fan `event` out to every matching subscriber.
    ///
    /// Returns the number of queues the event landed in. Full queues
    /// drop the event for that subscriber; the producer never blocks.
    pub fn publish(&self, event: &RoomEvent) -> usize {
        let mut state = self.state.lock().expect("bus lock");
        let mut delivered = 0usize;
        let mut dropped = 0u64;
        let now = Utc::now();
        for (id, slot) in state.subscribers.iter_mut() {
            if !slot.filter.matches(event) {
                continue;
            }
            match slot.sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    slot.last_activity = now;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.dropped += 1;
                    dropped += 1;
                    warn!(subscriber = %id, "queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver gone; the reap pass will collect the slot.
                }
            }
        }
        state.delivered += delivered as u64;
        state.dropped += dropped;
        delivered
    }

    /// Remove subscribers idle past the configured window or whose
    /// receiver is gone. Returns the reaped IDs.
    pub fn reap_idle(&self) -> Vec<SubscriberId> {
        let mut state = self.state.lock().expect("bus lock");
        let cutoff = Utc::now() - self.config.idle_timeout;
        let reaped: Vec<SubscriberId> = state
            .subscribers
            .iter()
            .filter(|(_, slot)| slot.last_activity < cutoff || slot.sender.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &reaped {
            state.subscribers.remove(id);
        }
        state.reaped += reaped.len() as u64;
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "reaped idle subscribers");
        }
        reaped
    }

    /// Current counters.
    pub fn stats(&self) -> BusStats {
        let state = self.state.lock().expect("bus lock");
        BusStats {
            subscribers: state.subscribers.len(),
            delivered: state.delivered,
            dropped: state.dropped,
            reaped: state.reaped,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(room: &str, sender: &str, n: usize) -> RoomEvent {
        RoomEvent::message(room, sender, format!("$e{n}"), format!("msg {n}"))
    }

    fn small_bus(capacity: usize) -> EventBus {
        EventBus::new(BusConfig {
            queue_capacity: capacity,
            max_subscribers: 4,
            idle_timeout: Duration::minutes(15),
        })
    }

    #[tokio::test]
    async fn delivers_matching_events_in_order() {
        let bus = small_bus(8);
        let mut sub = bus
            .subscribe(SubscriptionFilter {
                room_id: Some("!ops:example.com".to_string()),
                ..Default::default()
            })
            .unwrap();
        bus.publish(&event("!ops:example.com", "@a:example.com", 1));
        bus.publish(&event("!other:example.com", "@a:example.com", 2));
        bus.publish(&event("!ops:example.com", "@a:example.com", 3));

        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert_eq!(first.event_id.as_str(), "$e1");
        assert_eq!(second.event_id.as_str(), "$e3");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_newest_and_counts() {
        let capacity = 4;
        let burst = 10;
        let bus = small_bus(capacity);
        let mut sub = bus.subscribe(SubscriptionFilter::default()).unwrap();
        for n in 0..burst {
            bus.publish(&event("!r:x", "@s:x", n));
        }
        // Exactly `capacity` events survive, and they are the oldest.
        let mut received = Vec::new();
        while let Ok(ev) = sub.receiver.try_recv() {
            received.push(ev.event_id.as_str().to_string());
        }
        assert_eq!(received.len(), capacity);
        assert_eq!(received, vec!["$e0", "$e1", "$e2", "$e3"]);
        assert_eq!(bus.stats().dropped, (burst - capacity) as u64);
    }

    #[tokio::test]
    async fn filter_by_sender_and_type() {
        let bus = small_bus(8);
        let mut sub = bus
            .subscribe(SubscriptionFilter {
                sender_id: Some("@alice:example.com".to_string()),
                event_types: vec!["m.room.message".to_string()],
                ..Default::default()
            })
            .unwrap();
        bus.publish(&event("!r:x", "@alice:example.com", 1));
        bus.publish(&event("!r:x", "@bob:example.com", 2));
        let mut typed = event("!r:x", "@alice:example.com", 3);
        typed.event_type = "m.room.topic".to_string();
        bus.publish(&typed);

        assert_eq!(sub.receiver.recv().await.unwrap().event_id.as_str(), "$e1");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn subscriber_cap_is_enforced() {
        let bus = small_bus(8);
        let _subs: Vec<Subscription> = (0..4)
            .map(|_| bus.subscribe(SubscriptionFilter::default()).unwrap())
            .collect();
        assert!(matches!(
            bus.subscribe(SubscriptionFilter::default()),
            Err(BusError::SubscriberLimit(4))
        ));
    }

    #[test]
    fn unsubscribe_unknown_is_an_error() {
        let bus = small_bus(8);
        assert!(matches!(
            bus.unsubscribe(&SubscriberId::new("sub-999")),
            Err(BusError::UnknownSubscriber(_))
        ));
    }

    #[test]
    fn reap_collects_dropped_receivers() {
        let bus = small_bus(8);
        let sub = bus.subscribe(SubscriptionFilter::default()).unwrap();
        let id = sub.id.clone();
        drop(sub);
        let reaped = bus.reap_idle();
        assert_eq!(reaped, vec![id]);
        assert_eq!(bus.stats().subscribers, 0);
        assert_eq!(bus.stats().reaped, 1);
    }

    #[test]
    fn reap_collects_idle_subscribers() {
        let bus = EventBus::new(BusConfig {
            queue_capacity: 8,
            max_subscribers: 4,
            idle_timeout: Duration::zero(),
        });
        let _sub = bus.subscribe(SubscriptionFilter::default()).unwrap();
        // Zero idle window: anything not touched this instant is stale.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(bus.reap_idle().len(), 1);
    }
}
