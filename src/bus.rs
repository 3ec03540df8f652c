//! In-process publish/subscribe fan-out. Grounded on
//! `internal/pubsub/memory.go`: a `topic -> subscriber_id -> channel` map
//! behind one lock, bounded per-subscriber buffers, and non-blocking sends
//! so a slow subscriber can never stall the publisher or the other
//! subscribers on the same topic.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default per-subscriber channel capacity, matching the Go original's
/// buffer-of-100 "tolerate bursts" sizing.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    pub active_topics: usize,
    pub total_subscribers: usize,
}

struct Subscriber {
    sender: mpsc::Sender<Message>,
}

/// Bounded, non-blocking topic fan-out shared behind an `Arc` by every
/// Session and the Engine.
pub struct Bus {
    topics: DashMap<String, DashMap<String, Subscriber>>,
    capacity: usize,
}

/// Handle returned by [`Bus::subscribe`]. Dropping it (or calling
/// [`Subscription::unsubscribe`] explicitly) removes the subscriber and
/// closes its channel.
pub struct Subscription {
    topic: String,
    id: String,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Broadcasts `msg` to every subscriber of `msg.topic`. Full
    /// subscriber buffers are dropped silently rather than blocking the
    /// publisher; there are no subscribers for most topics most of the
    /// time, which is not an error.
    pub fn publish(&self, msg: Message) {
        let Some(subs) = self.topics.get(&msg.topic) else {
            return;
        };
        for entry in subs.iter() {
            let _ = entry.value().sender.try_send(msg.clone());
        }
    }

    /// Joins `topic`, returning a receiver and an unsubscribe handle.
    pub fn subscribe(&self, topic: &str) -> (mpsc::Receiver<Message>, Subscription) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4().to_string();
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(id.clone(), Subscriber { sender: tx });
        (
            rx,
            Subscription {
                topic: topic.to_string(),
                id,
            },
        )
    }

    /// Idempotent: removing an already-removed subscriber is a no-op.
    pub fn unsubscribe(&self, sub: &Subscription) {
        if let Some(subs) = self.topics.get(&sub.topic) {
            subs.remove(&sub.id);
            let empty = subs.is_empty();
            drop(subs);
            if empty {
                self.topics.remove(&sub.topic);
            }
        }
    }

    pub fn stats(&self) -> BusStats {
        let active_topics = self.topics.len();
        let total_subscribers = self.topics.iter().map(|t| t.value().len()).sum();
        BusStats {
            active_topics,
            total_subscribers,
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &[u8]) -> Message {
        Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            sender_id: None,
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_no_op() {
        let bus = Bus::new();
        bus.publish(msg("ws1", b"hello"));
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = Bus::new();
        let (mut rx, _sub) = bus.subscribe("ws1");
        bus.publish(msg("ws1", b"hello"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload, b"hello");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_cleans_up_empty_topic() {
        let bus = Bus::new();
        let (_rx, sub) = bus.subscribe("ws1");
        assert_eq!(bus.stats().active_topics, 1);
        bus.unsubscribe(&sub);
        assert_eq!(bus.stats().active_topics, 0);
        assert_eq!(bus.stats().total_subscribers, 0);
    }

    #[tokio::test]
    async fn full_subscriber_buffer_drops_rather_than_blocks() {
        let bus = Bus::with_capacity(1);
        let (rx, _sub) = bus.subscribe("ws1");
        bus.publish(msg("ws1", b"first"));
        bus.publish(msg("ws1", b"second")); // buffer full: dropped, not blocked
        drop(rx);
    }

    #[tokio::test]
    async fn stats_reflect_topics_and_subscriber_counts() {
        let bus = Bus::new();
        let (_a, _sub_a) = bus.subscribe("ws1");
        let (_b, _sub_b) = bus.subscribe("ws1");
        let (_c, _sub_c) = bus.subscribe("ws2");
        let stats = bus.stats();
        assert_eq!(stats.active_topics, 2);
        assert_eq!(stats.total_subscribers, 3);
    }
}
