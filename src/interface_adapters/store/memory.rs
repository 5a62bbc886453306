use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::{GameDefinition, GameInstance, InstanceId, InstanceStatus, InstanceStore};

#[derive(Default)]
struct Records {
    definitions: HashMap<String, GameDefinition>,
    // Creation order doubles as discovery order.
    instances: Vec<GameInstance>,
}

impl Records {
    fn instance_mut(&mut self, id: InstanceId) -> Option<&mut GameInstance> {
        self.instances.iter_mut().find(|instance| instance.id == id)
    }
}

// In-memory instance store used when no database is configured.
#[derive(Default)]
pub struct InMemoryInstanceStore {
    records: Mutex<Records>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: impl IntoIterator<Item = GameDefinition>) -> Self {
        let definitions = definitions
            .into_iter()
            .map(|definition| (definition.id.clone(), definition))
            .collect();
        Self {
            records: Mutex::new(Records {
                definitions,
                instances: Vec::new(),
            }),
        }
    }

    pub async fn status_of(&self, id: InstanceId) -> Option<InstanceStatus> {
        let records = self.records.lock().await;
        records
            .instances
            .iter()
            .find(|instance| instance.id == id)
            .map(|instance| instance.status)
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn find(&self, status: InstanceStatus) -> Result<Vec<GameInstance>, String> {
        let records = self.records.lock().await;
        Ok(records
            .instances
            .iter()
            .filter(|instance| instance.status == status)
            .cloned()
            .collect())
    }

    async fn conditional_transition(
        &self,
        id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    ) -> Result<bool, String> {
        let mut records = self.records.lock().await;
        match records.instance_mut(id) {
            Some(instance) if instance.status == from => {
                instance.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn write_final(
        &self,
        id: InstanceId,
        state: Value,
        status: InstanceStatus,
    ) -> Result<(), String> {
        let mut records = self.records.lock().await;
        let instance = records
            .instance_mut(id)
            .ok_or_else(|| format!("instance {id} not found"))?;
        if !instance.status.can_transition(status) {
            return Err(format!(
                "instance {id} cannot move from {} to {status}",
                instance.status
            ));
        }
        instance.status = status;
        instance.state = state;
        Ok(())
    }

    async fn get(&self, id: InstanceId) -> Result<Option<GameInstance>, String> {
        let records = self.records.lock().await;
        Ok(records
            .instances
            .iter()
            .find(|instance| instance.id == id)
            .cloned())
    }

    async fn definition(&self, id: &str) -> Result<Option<GameDefinition>, String> {
        let records = self.records.lock().await;
        Ok(records.definitions.get(id).cloned())
    }

    async fn create(&self, instance: GameInstance) -> Result<(), String> {
        let mut records = self.records.lock().await;
        if records.instances.iter().any(|existing| existing.id == instance.id) {
            return Err(format!("instance {} already exists", instance.id));
        }
        records.instances.push(instance);
        Ok(())
    }

    async fn update_settings(&self, id: InstanceId, settings: Value) -> Result<bool, String> {
        let mut records = self.records.lock().await;
        match records.instance_mut(id) {
            Some(instance) if instance.status == InstanceStatus::Ready => {
                instance.settings = settings;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
