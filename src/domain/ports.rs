use async_trait::async_trait;
use serde_json::Value;

use crate::domain::broadcast::BroadcastMessage;
use crate::domain::instance::{GameDefinition, GameInstance, InstanceId, InstanceStatus};

// Port for the external instance record store.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Instances currently in `status`, oldest first.
    async fn find(&self, status: InstanceStatus) -> Result<Vec<GameInstance>, String>;

    /// Atomically moves `id` from `from` to `to`. Returns false when the
    /// record was not in `from` (someone else won the transition).
    async fn conditional_transition(
        &self,
        id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    ) -> Result<bool, String>;

    /// Writes the terminal status together with the final state payload.
    async fn write_final(
        &self,
        id: InstanceId,
        state: Value,
        status: InstanceStatus,
    ) -> Result<(), String>;

    async fn get(&self, id: InstanceId) -> Result<Option<GameInstance>, String>;

    async fn definition(&self, id: &str) -> Result<Option<GameDefinition>, String>;

    async fn create(&self, instance: GameInstance) -> Result<(), String>;

    /// Replaces the settings overrides of a `ready` instance. Returns false
    /// when the instance is missing or already past `ready`.
    async fn update_settings(&self, id: InstanceId, settings: Value) -> Result<bool, String>;
}

// Port for outbound topic delivery. Delivery is fire-and-forget.
pub trait TopicTransport: Send + Sync {
    fn deliver(&self, topic: &str, message: &BroadcastMessage) -> Result<(), String>;
}
