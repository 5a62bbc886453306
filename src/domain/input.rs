// Inbound user actions consumed by simulation tasks.

use serde_json::Value;

use crate::domain::instance::{InstanceId, ParticipantId};

/// Participant id used for administrative events (never a real user).
pub const SYSTEM_PARTICIPANT: ParticipantId = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum InputPayload {
    /// Full set of currently held keys.
    HeldKeys { keys: Vec<String> },
    Pointer { x: f32, y: f32 },
    /// Discrete game action such as placing a tower.
    Action { name: String, data: Value },
    /// Request to end the instance; modules must treat it as terminal.
    Stop,
}

impl InputPayload {
    pub fn is_stop(&self) -> bool {
        matches!(self, InputPayload::Stop)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub instance_id: InstanceId,
    pub participant: ParticipantId,
    /// Monotonic per (instance, participant).
    pub seq: u64,
    pub payload: InputPayload,
}

impl InputEvent {
    pub fn stop(instance_id: InstanceId, seq: u64) -> Self {
        Self {
            instance_id,
            participant: SYSTEM_PARTICIPANT,
            seq,
            payload: InputPayload::Stop,
        }
    }
}
