// In-process topic transport: one broadcast channel per topic name.

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::domain::{BroadcastMessage, TopicTransport};
use crate::interface_adapters::protocol::OutboundMessage;

/// Serializes each message once and fans the JSON out to every subscriber.
/// Subscribers share one buffer all the way into the socket frame.
///
/// A topic with nobody listening swallows the message; snapshots are
/// periodic, so a later subscriber catches up on the next one.
pub struct TopicHub {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<Utf8Bytes>>>,
}

impl TopicHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to `topic`, creating it on first use.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Utf8Bytes> {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn topic_count(&self) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.len()
    }
}

impl TopicTransport for TopicHub {
    fn deliver(&self, topic: &str, message: &BroadcastMessage) -> Result<(), String> {
        let sender = {
            let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
            match topics.get(topic) {
                Some(sender) => sender.clone(),
                None => return Ok(()),
            }
        };

        let json = serde_json::to_string(&OutboundMessage::from(message))
            .map_err(|e| format!("failed to serialize {}: {e}", message.body.kind()))?;

        if sender.send(Utf8Bytes::from(json)).is_err() {
            // Every subscriber is gone; forget the topic until someone returns.
            let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
            if topics.get(topic).is_some_and(|s| s.receiver_count() == 0) {
                topics.remove(topic);
            }
        }
        Ok(())
    }
}
