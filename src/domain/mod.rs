// Domain layer: engine data model, ports, and the built-in game modules.

pub mod broadcast;
pub mod errors;
pub mod games;
pub mod input;
pub mod instance;
pub mod module;
pub mod ports;

pub use broadcast::{
    BroadcastMessage, Element, GameStateSnapshot, MessageBody, Position, Topic, TopicScope,
    topic_name,
};
pub use errors::{EngineError, FaultPhase, ModuleFault};
pub use input::{InputEvent, InputPayload, SYSTEM_PARTICIPANT};
pub use instance::{
    GameDefinition, GameInstance, InstanceId, InstanceStatus, ParticipantId, Settings,
};
pub use module::{GameModule, GameState, StateDescription};
pub use ports::{InstanceStore, TopicTransport};
