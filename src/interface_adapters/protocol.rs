// Wire protocol DTOs: the JSON contract with client renderers and the
// inbound transport, plus admin HTTP payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{
    BroadcastMessage, Element, GameInstance, GameStateSnapshot, InputEvent, InputPayload,
    MessageBody, ParticipantId, SYSTEM_PARTICIPANT,
};
use crate::use_cases::DiagnosticsSnapshot;

/// Messages the engine publishes to topics, tagged by `message_type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum OutboundMessage {
    GameState {
        instance_id: Uuid,
        timestamp: u64,
        game_state: GameStateDto,
    },
    #[serde(rename = "elems_update")]
    ElementsUpdate {
        instance_id: Uuid,
        timestamp: u64,
        elements: Vec<ElementDto>,
    },
    #[serde(rename = "settings_update")]
    SettingsUpdate {
        instance_id: Uuid,
        timestamp: u64,
        game_settings: Value,
        updated_by: Option<ParticipantId>,
    },
    RoomUpdate {
        instance_id: Uuid,
        timestamp: u64,
        participants: Vec<ParticipantId>,
    },
}

impl From<&BroadcastMessage> for OutboundMessage {
    fn from(message: &BroadcastMessage) -> Self {
        let instance_id = message.target.instance_id;
        let timestamp = message.timestamp_ms;
        match &message.body {
            MessageBody::GameState(snapshot) => OutboundMessage::GameState {
                instance_id,
                timestamp,
                game_state: GameStateDto::from(snapshot),
            },
            MessageBody::ElementsUpdate(elements) => OutboundMessage::ElementsUpdate {
                instance_id,
                timestamp,
                elements: elements.iter().map(ElementDto::from).collect(),
            },
            MessageBody::SettingsChanged {
                settings,
                updated_by,
            } => OutboundMessage::SettingsUpdate {
                instance_id,
                timestamp,
                game_settings: settings.clone(),
                updated_by: *updated_by,
            },
            MessageBody::RoomUpdated { participants } => OutboundMessage::RoomUpdate {
                instance_id,
                timestamp,
                participants: participants.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GameStateDto {
    pub status: String,
    pub resources: BTreeMap<String, i64>,
    pub progress: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<f64>,
}

impl From<&GameStateSnapshot> for GameStateDto {
    fn from(snapshot: &GameStateSnapshot) -> Self {
        Self {
            status: snapshot.status.clone(),
            resources: snapshot.resources.clone(),
            progress: snapshot.progress,
            time_remaining: snapshot.time_remaining,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionDto {
    pub x: f32,
    pub y: f32,
}

/// Positioned entity as the renderer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ElementDto {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: PositionDto,
    pub state: String,
    pub properties: Value,
}

impl From<&Element> for ElementDto {
    fn from(element: &Element) -> Self {
        Self {
            id: element.id.clone(),
            kind: element.kind.clone(),
            position: PositionDto {
                x: element.position.x,
                y: element.position.y,
            },
            state: element.state.clone(),
            properties: element.properties.clone(),
        }
    }
}

/// One inbound user action as delivered by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct InputEventDto {
    pub instance_id: Uuid,
    pub participant_id: ParticipantId,
    pub seq: u64,
    pub payload: InputPayloadDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InputPayloadDto {
    Keys {
        #[serde(default)]
        keys: Vec<String>,
    },
    Pointer {
        x: f32,
        y: f32,
    },
    Action {
        name: String,
        #[serde(default)]
        data: Value,
    },
    Stop,
}

impl TryFrom<InputEventDto> for InputEvent {
    type Error = String;

    // Stop is reserved for the admin surface; clients cannot end instances.
    fn try_from(dto: InputEventDto) -> Result<Self, Self::Error> {
        if dto.participant_id == SYSTEM_PARTICIPANT {
            return Err("participant_id 0 is reserved".to_string());
        }
        let payload = match dto.payload {
            InputPayloadDto::Keys { keys } => InputPayload::HeldKeys { keys },
            InputPayloadDto::Pointer { x, y } => InputPayload::Pointer { x, y },
            InputPayloadDto::Action { name, data } => InputPayload::Action { name, data },
            InputPayloadDto::Stop => {
                return Err("stop is not accepted from participants".to_string());
            }
        };
        Ok(InputEvent {
            instance_id: dto.instance_id,
            participant: dto.participant_id,
            seq: dto.seq,
            payload,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceRequest {
    pub definition_id: String,
    pub participants: Vec<ParticipantId>,
    #[serde(default = "empty_object")]
    pub settings: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceResponse {
    pub instance_id: Uuid,
    pub definition_id: String,
    pub status: String,
    pub participants: Vec<ParticipantId>,
}

impl From<&GameInstance> for InstanceResponse {
    fn from(instance: &GameInstance) -> Self {
        Self {
            instance_id: instance.id,
            definition_id: instance.definition.id.clone(),
            status: instance.status.to_string(),
            participants: instance.participants.clone(),
        }
    }
}

/// Stored record plus the latest snapshot when a task is running it.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceDetailResponse {
    pub instance: InstanceResponse,
    pub live_state: Option<GameStateDto>,
    pub final_state: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsUpdateRequest {
    pub settings: Value,
    #[serde(default)]
    pub updated_by: Option<ParticipantId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub instance_id: Uuid,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatusResponse {
    pub running: bool,
    pub live_instances: usize,
    pub diagnostics: DiagnosticsDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsDto {
    pub inputs_queued: u64,
    pub inputs_dropped_overflow: u64,
    pub inputs_discarded_no_task: u64,
    pub inputs_discarded_unknown_participant: u64,
    pub inputs_discarded_stale: u64,
    pub broadcasts_delivered: u64,
    pub broadcasts_dropped: u64,
    pub claims_lost: u64,
    pub instances_launched: u64,
    pub instances_ended: u64,
    pub instances_failed: u64,
    pub final_writes_lost: u64,
}

impl From<DiagnosticsSnapshot> for DiagnosticsDto {
    fn from(snapshot: DiagnosticsSnapshot) -> Self {
        Self {
            inputs_queued: snapshot.inputs_queued,
            inputs_dropped_overflow: snapshot.inputs_dropped_overflow,
            inputs_discarded_no_task: snapshot.inputs_discarded_no_task,
            inputs_discarded_unknown_participant: snapshot.inputs_discarded_unknown_participant,
            inputs_discarded_stale: snapshot.inputs_discarded_stale,
            broadcasts_delivered: snapshot.broadcasts_delivered,
            broadcasts_dropped: snapshot.broadcasts_dropped,
            claims_lost: snapshot.claims_lost,
            instances_launched: snapshot.instances_launched,
            instances_ended: snapshot.instances_ended,
            instances_failed: snapshot.instances_failed,
            final_writes_lost: snapshot.final_writes_lost,
        }
    }
}

/// JSON error body shared by every admin route.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
