// Outbound notifications and the single topic naming function.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::instance::{InstanceId, ParticipantId};

/// Scope of a delivery topic within one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicScope {
    InstanceRoom,
    /// Pre-start waiting area where settings and the roster are negotiated.
    WaitingArea,
    Participant(ParticipantId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic {
    pub instance_id: InstanceId,
    pub scope: TopicScope,
}

impl Topic {
    pub fn room(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            scope: TopicScope::InstanceRoom,
        }
    }

    pub fn waiting_area(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            scope: TopicScope::WaitingArea,
        }
    }

    pub fn participant(instance_id: InstanceId, participant: ParticipantId) -> Self {
        Self {
            instance_id,
            scope: TopicScope::Participant(participant),
        }
    }
}

/// Resolves the delivery topic name for a target.
///
/// This is the only place topic names are built. Participant topics are
/// per-user rather than per-instance so a client needs a single subscription
/// for its direct messages.
pub fn topic_name(topic: &Topic) -> String {
    match topic.scope {
        TopicScope::InstanceRoom => format!("game_{}", topic.instance_id),
        TopicScope::WaitingArea => format!("waiting_room_{}", topic.instance_id),
        TopicScope::Participant(participant) => format!("user_{participant}"),
    }
}

/// Periodic summary of an instance's state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameStateSnapshot {
    /// Module-defined status text, e.g. "active", "won", "lost".
    pub status: String,
    pub resources: BTreeMap<String, i64>,
    pub progress: u32,
    /// Seconds until the next module-defined milestone, if any.
    pub time_remaining: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// A positioned, stateful entity shown by client renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: String,
    pub kind: String,
    pub position: Position,
    pub state: String,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    GameState(GameStateSnapshot),
    ElementsUpdate(Vec<Element>),
    SettingsChanged {
        settings: Value,
        updated_by: Option<ParticipantId>,
    },
    RoomUpdated {
        participants: Vec<ParticipantId>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::GameState(_) => "game_state",
            MessageBody::ElementsUpdate(_) => "elems_update",
            MessageBody::SettingsChanged { .. } => "settings_update",
            MessageBody::RoomUpdated { .. } => "room_update",
        }
    }
}

/// One ephemeral outbound notification.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub target: Topic,
    pub body: MessageBody,
    /// Epoch milliseconds; strictly increasing per instance for snapshots.
    pub timestamp_ms: u64,
}
