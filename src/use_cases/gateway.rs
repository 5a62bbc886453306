// Broadcast gateway: resolves topics and hands messages to the transport.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::domain::{BroadcastMessage, TopicTransport, topic_name};
use crate::use_cases::diagnostics::{EngineDiagnostics, LogThrottle, bump};

/// Fire-and-forget fan-out of outbound messages.
///
/// Nothing is retried or buffered: the next scheduled snapshot replaces
/// whatever a subscriber missed.
#[derive(Clone)]
pub struct BroadcastGateway {
    transport: Arc<dyn TopicTransport>,
    diagnostics: Arc<EngineDiagnostics>,
    failure_log: Arc<LogThrottle>,
}

impl BroadcastGateway {
    pub fn new(transport: Arc<dyn TopicTransport>, diagnostics: Arc<EngineDiagnostics>) -> Self {
        Self {
            transport,
            diagnostics,
            failure_log: Arc::new(LogThrottle::default()),
        }
    }

    /// Delivers `message` to its target topic. Returns false if the transport
    /// rejected it; the failure is counted and logged, never propagated.
    pub fn publish(&self, message: BroadcastMessage) -> bool {
        let topic = topic_name(&message.target);
        match self.transport.deliver(&topic, &message) {
            Ok(()) => {
                bump(&self.diagnostics.broadcasts_delivered);
                debug!(topic = %topic, kind = message.body.kind(), "broadcast delivered");
                true
            }
            Err(error) => {
                bump(&self.diagnostics.broadcasts_dropped);
                if self.failure_log.ready() {
                    warn!(
                        topic = %topic,
                        kind = message.body.kind(),
                        error = %error,
                        "broadcast dropped"
                    );
                }
                false
            }
        }
    }
}

/// Wall-clock timestamp carried by outbound messages.
pub fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GameStateSnapshot, MessageBody, Topic};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingTransport {
        topics: Mutex<Vec<String>>,
        fail: bool,
    }

    impl TopicTransport for RecordingTransport {
        fn deliver(&self, topic: &str, _message: &BroadcastMessage) -> Result<(), String> {
            if self.fail {
                return Err("transport offline".to_string());
            }
            self.topics.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    fn snapshot_for(instance_id: Uuid) -> BroadcastMessage {
        BroadcastMessage {
            target: Topic::room(instance_id),
            body: MessageBody::GameState(GameStateSnapshot::default()),
            timestamp_ms: now_epoch_millis(),
        }
    }

    #[test]
    fn when_message_is_published_then_transport_receives_resolved_topic() {
        let transport = Arc::new(RecordingTransport::default());
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let gateway = BroadcastGateway::new(transport.clone(), diagnostics.clone());
        let id = Uuid::new_v4();

        assert!(gateway.publish(snapshot_for(id)));
        assert_eq!(*transport.topics.lock().unwrap(), vec![format!("game_{id}")]);
        assert_eq!(diagnostics.snapshot().broadcasts_delivered, 1);
    }

    #[test]
    fn when_transport_fails_then_publish_counts_a_drop() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let gateway = BroadcastGateway::new(transport, diagnostics.clone());

        assert!(!gateway.publish(snapshot_for(Uuid::new_v4())));
        assert!(!gateway.publish(snapshot_for(Uuid::new_v4())));
        assert_eq!(diagnostics.snapshot().broadcasts_dropped, 2);
    }
}
