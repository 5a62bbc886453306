// Capability set every pluggable game implements.

use serde_json::Value;
use std::time::Duration;

use crate::domain::broadcast::{Element, GameStateSnapshot};
use crate::domain::errors::ModuleFault;
use crate::domain::input::InputEvent;
use crate::domain::instance::{ParticipantId, Settings};

/// What a module reports about its state after a tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateDescription {
    pub snapshot: GameStateSnapshot,
    pub elements: Vec<Element>,
    /// True once a termination predicate holds (win/loss, exhaustion, stop).
    pub terminal: bool,
}

/// Factory for one class of game, registered under a module id.
///
/// `initialize` must not have side effects beyond producing the state.
pub trait GameModule: Send + Sync {
    fn module_id(&self) -> &'static str;

    fn initialize(
        &self,
        settings: &Settings,
        participants: &[ParticipantId],
    ) -> Result<Box<dyn GameState>, ModuleFault>;
}

/// Authoritative state of one instance, owned by exactly one simulation task.
pub trait GameState: Send {
    /// Applies a batch of events already ordered by (participant, seq).
    fn handle_input(&mut self, events: &[InputEvent]) -> Result<(), ModuleFault>;

    /// Advances the simulation by one fixed step.
    fn tick(&mut self, dt: Duration) -> Result<(), ModuleFault>;

    fn describe_state(&self) -> Result<StateDescription, ModuleFault>;

    /// Serializable form persisted when the instance finishes.
    fn export_state(&self) -> Result<Value, ModuleFault>;
}
