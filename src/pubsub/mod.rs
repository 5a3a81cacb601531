//! Topic-based notification bus with buffered, lossy, non-blocking fan-out.
//!
//! The bus maps a topic string (in practice, a key) to a set of subscriber
//! sinks. Each sink is a bounded FIFO; a publish snapshots the current sinks
//! under a shared lock, releases it, and then attempts a non-blocking send
//! to each sink. A sink whose buffer is full simply misses the message:
//! publishers never block and never allocate unbounded memory, so store
//! mutations and the expiration reaper cannot be throttled by a slow
//! subscriber.
//!
//! Subscribers own the read end of their sink ([`Subscription`]); the bus
//! owns the write ends. Closing a sink (unsubscribe, topic teardown, bus
//! shutdown) drops the write end, which the subscriber observes as
//! end-of-stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::trace;

struct PubSubInner {
    /// topic -> (sink id -> write end). Topics with no sinks are pruned.
    topics: RwLock<HashMap<String, HashMap<u64, mpsc::Sender<String>>>>,
    buffer_size: usize,
    next_id: AtomicU64,
}

/// The notification bus. Cheap to clone; clones share the topic table.
#[derive(Clone)]
pub struct PubSub {
    inner: Arc<PubSubInner>,
}

/// The read end of one subscriber sink.
///
/// Dropping a `Subscription` without unsubscribing leaks its write end in
/// the topic table until the topic is torn down or the bus is closed; this
/// is accepted, matching the bus's shutdown contract.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    /// The topic this sink is attached to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receives the next message, or `None` once the sink is closed and
    /// drained (end-of-stream).
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl PubSub {
    /// Creates a bus whose sinks buffer up to `buffer_size` messages each.
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = if buffer_size == 0 { 10_000 } else { buffer_size };
        Self {
            inner: Arc::new(PubSubInner {
                topics: RwLock::new(HashMap::new()),
                buffer_size,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new sink on `topic` and hands its read end to the caller.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer_size);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.inner.topics.write().unwrap();
        topics.entry(topic.to_string()).or_default().insert(id, tx);
        trace!(topic, id, "subscriber registered");

        Subscription {
            topic: topic.to_string(),
            id,
            rx,
        }
    }

    /// De-registers the subscription's sink. When the topic has no sinks
    /// left it is removed from the table. The subscriber observes
    /// end-of-stream once buffered messages are drained.
    pub fn unsubscribe(&self, sub: &Subscription) {
        let mut topics = self.inner.topics.write().unwrap();
        if let Some(sinks) = topics.get_mut(&sub.topic) {
            sinks.remove(&sub.id);
            if sinks.is_empty() {
                topics.remove(&sub.topic);
            }
        }
        trace!(topic = %sub.topic, id = sub.id, "subscriber removed");
    }

    /// Delivers `message` to every sink on `topic`. Sinks with a full
    /// buffer miss the message; the call never blocks.
    pub fn publish(&self, topic: &str, message: &str) {
        let senders: Vec<mpsc::Sender<String>> = {
            let topics = self.inner.topics.read().unwrap();
            match topics.get(topic) {
                Some(sinks) => sinks.values().cloned().collect(),
                None => return,
            }
        };

        for sender in senders {
            if sender.try_send(message.to_string()).is_err() {
                trace!(topic, "message dropped: sink full or closed");
            }
        }
    }

    /// Topics that currently have at least one sink (snapshot).
    pub fn list_subscribers(&self) -> Vec<String> {
        let topics = self.inner.topics.read().unwrap();
        topics.keys().cloned().collect()
    }

    /// Removes `topic` and closes every sink attached to it.
    pub fn unsubscribe_all_for_key(&self, topic: &str) {
        let removed = {
            let mut topics = self.inner.topics.write().unwrap();
            topics.remove(topic)
        };
        // Dropping the senders outside the lock closes the sinks.
        if let Some(sinks) = removed {
            trace!(topic, count = sinks.len(), "topic torn down");
        }
    }

    /// Swaps the topic table for an empty one and closes every sink.
    pub fn close(&self) {
        let old = {
            let mut topics = self.inner.topics.write().unwrap();
            std::mem::take(&mut *topics)
        };
        trace!(topics = old.len(), "bus closed");
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.inner.topics.read().unwrap();
        f.debug_struct("PubSub")
            .field("topics", &topics.len())
            .field("buffer_size", &self.inner.buffer_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = PubSub::new(16);
        let mut sub = bus.subscribe("orders");

        bus.publish("orders", "SET: 1");
        assert_eq!(sub.recv().await, Some("SET: 1".to_string()));
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_subscribers() {
        let bus = PubSub::new(16);
        let mut a = bus.subscribe("t");
        let mut b = bus.subscribe("t");

        bus.publish("t", "hello");
        assert_eq!(a.recv().await, Some("hello".to_string()));
        assert_eq!(b.recv().await, Some("hello".to_string()));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = PubSub::new(16);
        bus.publish("nobody", "dropped");
        assert!(bus.list_subscribers().is_empty());
    }

    #[tokio::test]
    async fn test_full_sink_drops_messages() {
        let bus = PubSub::new(4);
        let mut sub = bus.subscribe("t");

        for i in 0..10 {
            bus.publish("t", &format!("m{}", i));
        }

        let mut received = Vec::new();
        while let Some(msg) = sub.try_recv() {
            received.push(msg);
        }
        // Exactly the first 4 fit; the rest were dropped, in order.
        assert_eq!(received, vec!["m0", "m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_sink_and_prunes_topic() {
        let bus = PubSub::new(16);
        let mut sub = bus.subscribe("t");
        assert_eq!(bus.list_subscribers(), vec!["t".to_string()]);

        bus.unsubscribe(&sub);
        assert!(bus.list_subscribers().is_empty());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_for_key_closes_every_sink() {
        let bus = PubSub::new(16);
        let mut a = bus.subscribe("t");
        let mut b = bus.subscribe("t");
        bus.publish("t", "last");

        bus.unsubscribe_all_for_key("t");

        // Buffered messages are still delivered, then end-of-stream.
        assert_eq!(a.recv().await, Some("last".to_string()));
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, Some("last".to_string()));
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_tears_down_all_topics() {
        let bus = PubSub::new(16);
        let mut a = bus.subscribe("x");
        let mut b = bus.subscribe("y");

        bus.close();
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
        assert!(bus.list_subscribers().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_leaves_other_sinks_live() {
        let bus = PubSub::new(16);
        let a = bus.subscribe("t");
        let mut b = bus.subscribe("t");

        bus.unsubscribe(&a);
        bus.publish("t", "still here");
        assert_eq!(b.recv().await, Some("still here".to_string()));
    }
}
