// Use cases layer: the simulation engine workflows.

pub mod diagnostics;
pub mod gateway;
pub mod live;
pub mod management;
pub mod registry;
pub mod router;
pub mod simulation;
pub mod supervisor;

pub use diagnostics::{DiagnosticsSnapshot, EngineDiagnostics};
pub use gateway::BroadcastGateway;
pub use live::{InputQueue, InstanceHandle, LiveInstances};
pub use registry::GameModuleRegistry;
pub use router::{InputRouter, RouteOutcome};
pub use simulation::{FinalWritePolicy, SimulationTask, TaskExit};
pub use supervisor::{Supervisor, SupervisorSettings};
