// Domain-level errors for the simulation engine.

use std::fmt;

use crate::domain::instance::InstanceId;

/// Engine call that a module fault happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPhase {
    Initialize,
    HandleInput,
    Tick,
    DescribeState,
    ExportState,
}

impl FaultPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultPhase::Initialize => "initialize",
            FaultPhase::HandleInput => "handle_input",
            FaultPhase::Tick => "tick",
            FaultPhase::DescribeState => "describe_state",
            FaultPhase::ExportState => "export_state",
        }
    }
}

/// A failure raised by game module code.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleFault {
    pub phase: FaultPhase,
    pub message: String,
}

impl ModuleFault {
    pub fn new(phase: FaultPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

impl fmt::Display for ModuleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase.as_str(), self.message)
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// Definition references a module id the registry does not know.
    ConfigUnknownModule(String),
    ConfigMalformedSettings(String),
    /// Pre-start operation on an instance that is missing or already started.
    InstanceNotReady(InstanceId),
    UnknownDefinition(String),
    InvalidParticipants(String),
    Module(ModuleFault),
    StoreFailure(String),
    DeliveryFailure(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ConfigUnknownModule(id) => write!(f, "unknown game module: {id}"),
            EngineError::ConfigMalformedSettings(msg) => write!(f, "malformed settings: {msg}"),
            EngineError::InstanceNotReady(id) => write!(f, "instance {id} is not ready"),
            EngineError::UnknownDefinition(id) => write!(f, "unknown game definition: {id}"),
            EngineError::InvalidParticipants(msg) => write!(f, "invalid participants: {msg}"),
            EngineError::Module(fault) => write!(f, "module fault: {fault}"),
            EngineError::StoreFailure(msg) => write!(f, "store failure: {msg}"),
            EngineError::DeliveryFailure(msg) => write!(f, "delivery failure: {msg}"),
        }
    }
}

impl From<ModuleFault> for EngineError {
    fn from(fault: ModuleFault) -> Self {
        EngineError::Module(fault)
    }
}
