// Instance and definition records shared between the engine and the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::EngineError;

pub type InstanceId = Uuid;
pub type ParticipantId = u64;
pub type Settings = Value;

/// Lifecycle status of a game instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Ready,
    Starting,
    Ongoing,
    Ended,
    Error,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Ready => "ready",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Ongoing => "ongoing",
            InstanceStatus::Ended => "ended",
            InstanceStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Ended | InstanceStatus::Error)
    }

    /// Returns true if `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition(self, to: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, to),
            (Ready, Starting)
                | (Starting, Ongoing)
                | (Starting, Error)
                | (Ongoing, Ended)
                | (Ongoing, Error)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ready" => Ok(InstanceStatus::Ready),
            "starting" => Ok(InstanceStatus::Starting),
            "ongoing" => Ok(InstanceStatus::Ongoing),
            "ended" => Ok(InstanceStatus::Ended),
            "error" => Ok(InstanceStatus::Error),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// Template for a class of simulation. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct GameDefinition {
    pub id: String,
    /// Registry key of the game module that runs instances of this definition.
    pub module_id: String,
    pub max_participants: usize,
    pub tick_interval: Duration,
    pub broadcast_interval: Duration,
    pub default_settings: Settings,
}

/// One running or finished simulation.
#[derive(Debug, Clone)]
pub struct GameInstance {
    pub id: InstanceId,
    pub definition: GameDefinition,
    pub status: InstanceStatus,
    pub participants: Vec<ParticipantId>,
    /// Overrides applied on top of the definition defaults.
    pub settings: Settings,
    /// Opaque authoritative state; only written back at termination.
    pub state: Value,
}

impl GameInstance {
    /// Builds a fresh `ready` instance, as the instance-creation flow would.
    pub fn ready(
        definition: GameDefinition,
        participants: Vec<ParticipantId>,
        settings: Settings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            status: InstanceStatus::Ready,
            participants,
            settings,
            state: Value::Null,
        }
    }

    /// Definition defaults shallow-merged with the instance overrides.
    pub fn effective_settings(&self) -> Result<Settings, EngineError> {
        let mut merged = match &self.definition.default_settings {
            Value::Object(defaults) => defaults.clone(),
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(EngineError::ConfigMalformedSettings(format!(
                    "definition {} default settings must be an object",
                    self.definition.id
                )));
            }
        };

        match &self.settings {
            Value::Object(overrides) => {
                for (key, value) in overrides {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            _ => {
                return Err(EngineError::ConfigMalformedSettings(
                    "instance settings must be an object".to_string(),
                ));
            }
        }

        Ok(Value::Object(merged))
    }
}
