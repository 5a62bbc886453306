// Instance management outside the tick loop: creation, settings, announcements.

use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

use crate::domain::{
    BroadcastMessage, EngineError, GameInstance, InstanceId, InstanceStore, MessageBody,
    ParticipantId, SYSTEM_PARTICIPANT, Topic,
};
use crate::use_cases::gateway::{BroadcastGateway, now_epoch_millis};

/// Records a new `ready` instance of `definition_id` for discovery to pick up.
pub async fn create_instance(
    store: &dyn InstanceStore,
    definition_id: &str,
    participants: Vec<ParticipantId>,
    settings: Value,
) -> Result<GameInstance, EngineError> {
    let definition = store
        .definition(definition_id)
        .await
        .map_err(EngineError::StoreFailure)?
        .ok_or_else(|| EngineError::UnknownDefinition(definition_id.to_string()))?;

    if participants.is_empty() {
        return Err(EngineError::InvalidParticipants(
            "at least one participant is required".to_string(),
        ));
    }
    if participants.len() > definition.max_participants {
        return Err(EngineError::InvalidParticipants(format!(
            "{} allows at most {} participants",
            definition.id, definition.max_participants
        )));
    }
    if participants.contains(&SYSTEM_PARTICIPANT) {
        return Err(EngineError::InvalidParticipants(
            "participant id 0 is reserved".to_string(),
        ));
    }
    let unique: HashSet<ParticipantId> = participants.iter().copied().collect();
    if unique.len() != participants.len() {
        return Err(EngineError::InvalidParticipants(
            "participants must be unique".to_string(),
        ));
    }

    let instance = GameInstance::ready(definition, participants, settings);
    instance.effective_settings()?;
    store
        .create(instance.clone())
        .await
        .map_err(EngineError::StoreFailure)?;

    info!(
        instance_id = %instance.id,
        definition_id,
        participants = instance.participants.len(),
        "instance created"
    );
    Ok(instance)
}

/// Replaces the overrides of a not-yet-started instance and tells the
/// waiting area about it.
pub async fn update_settings(
    store: &dyn InstanceStore,
    gateway: &BroadcastGateway,
    instance_id: InstanceId,
    settings: Value,
    updated_by: Option<ParticipantId>,
) -> Result<(), EngineError> {
    if !settings.is_object() {
        return Err(EngineError::ConfigMalformedSettings(
            "settings overrides must be a JSON object".to_string(),
        ));
    }

    let updated = store
        .update_settings(instance_id, settings.clone())
        .await
        .map_err(EngineError::StoreFailure)?;
    if !updated {
        return Err(EngineError::InstanceNotReady(instance_id));
    }

    info!(instance_id = %instance_id, ?updated_by, "instance settings updated");
    announce_settings_changed(gateway, instance_id, settings, updated_by);
    Ok(())
}

pub fn announce_settings_changed(
    gateway: &BroadcastGateway,
    instance_id: InstanceId,
    settings: Value,
    updated_by: Option<ParticipantId>,
) -> bool {
    gateway.publish(BroadcastMessage {
        target: Topic::waiting_area(instance_id),
        body: MessageBody::SettingsChanged {
            settings,
            updated_by,
        },
        timestamp_ms: now_epoch_millis(),
    })
}

/// Tells the instance room who is playing.
pub fn announce_room_updated(
    gateway: &BroadcastGateway,
    instance_id: InstanceId,
    participants: &[ParticipantId],
) -> bool {
    gateway.publish(BroadcastMessage {
        target: Topic::room(instance_id),
        body: MessageBody::RoomUpdated {
            participants: participants.to_vec(),
        },
        timestamp_ms: now_epoch_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GameDefinition, InstanceStatus, TopicTransport};
    use crate::interface_adapters::store::InMemoryInstanceStore;
    use crate::use_cases::EngineDiagnostics;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        topics: Mutex<Vec<String>>,
    }

    impl TopicTransport for RecordingTransport {
        fn deliver(&self, topic: &str, _message: &BroadcastMessage) -> Result<(), String> {
            self.topics.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    fn store() -> InMemoryInstanceStore {
        InMemoryInstanceStore::with_definitions([GameDefinition {
            id: "Duel".to_string(),
            module_id: "duel".to_string(),
            max_participants: 2,
            tick_interval: Duration::from_millis(50),
            broadcast_interval: Duration::from_millis(500),
            default_settings: json!({"rounds": 3}),
        }])
    }

    #[tokio::test]
    async fn when_request_is_valid_then_instance_is_stored_as_ready() {
        let store = store();

        let instance = create_instance(&store, "Duel", vec![4, 9], json!({"rounds": 5}))
            .await
            .unwrap();

        assert_eq!(store.status_of(instance.id).await, Some(InstanceStatus::Ready));
        assert_eq!(instance.effective_settings().unwrap()["rounds"], 5);
    }

    #[tokio::test]
    async fn when_participants_break_the_rules_then_creation_is_rejected() {
        let store = store();

        for participants in [vec![], vec![1, 2, 3], vec![0, 1], vec![5, 5]] {
            let result = create_instance(&store, "Duel", participants.clone(), json!({})).await;
            assert!(
                matches!(result, Err(EngineError::InvalidParticipants(_))),
                "{participants:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn when_definition_is_unknown_then_creation_is_rejected() {
        let result = create_instance(&store(), "Chess", vec![1], json!({})).await;

        assert!(matches!(result, Err(EngineError::UnknownDefinition(id)) if id == "Chess"));
    }

    #[tokio::test]
    async fn when_settings_update_lands_then_waiting_area_is_told() {
        let store = store();
        let transport = Arc::new(RecordingTransport::default());
        let gateway =
            BroadcastGateway::new(transport.clone(), Arc::new(EngineDiagnostics::default()));
        let instance = create_instance(&store, "Duel", vec![1], json!({})).await.unwrap();

        update_settings(&store, &gateway, instance.id, json!({"rounds": 1}), Some(1))
            .await
            .unwrap();

        assert_eq!(
            transport.topics.lock().unwrap().as_slice(),
            [format!("waiting_room_{}", instance.id)]
        );
    }

    #[tokio::test]
    async fn when_settings_are_not_an_object_then_update_is_rejected() {
        let store = store();
        let gateway = BroadcastGateway::new(
            Arc::new(RecordingTransport::default()),
            Arc::new(EngineDiagnostics::default()),
        );
        let instance = create_instance(&store, "Duel", vec![1], json!({})).await.unwrap();

        let result = update_settings(&store, &gateway, instance.id, json!([1, 2]), None).await;

        assert!(matches!(result, Err(EngineError::ConfigMalformedSettings(_))));
    }
}
