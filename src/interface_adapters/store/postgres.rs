use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{GameDefinition, GameInstance, InstanceId, InstanceStatus, InstanceStore};

const INSTANCE_COLUMNS: &str = r#"
    i.id, i.status, i.participants, i.settings, i.state,
    d.id AS definition_id, d.module_id, d.max_participants,
    d.tick_interval_ms, d.broadcast_interval_ms, d.default_settings
"#;

#[derive(Debug, sqlx::FromRow)]
struct DefinitionRow {
    id: String,
    module_id: String,
    max_participants: i32,
    tick_interval_ms: i64,
    broadcast_interval_ms: i64,
    default_settings: Value,
}

impl From<DefinitionRow> for GameDefinition {
    fn from(row: DefinitionRow) -> Self {
        Self {
            id: row.id,
            module_id: row.module_id,
            max_participants: row.max_participants.max(0) as usize,
            tick_interval: Duration::from_millis(row.tick_interval_ms.max(0) as u64),
            broadcast_interval: Duration::from_millis(row.broadcast_interval_ms.max(0) as u64),
            default_settings: row.default_settings,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    id: Uuid,
    status: String,
    participants: Vec<i64>,
    settings: Value,
    state: Option<Value>,
    definition_id: String,
    module_id: String,
    max_participants: i32,
    tick_interval_ms: i64,
    broadcast_interval_ms: i64,
    default_settings: Value,
}

impl TryFrom<InstanceRow> for GameInstance {
    type Error = String;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let definition = GameDefinition::from(DefinitionRow {
            id: row.definition_id,
            module_id: row.module_id,
            max_participants: row.max_participants,
            tick_interval_ms: row.tick_interval_ms,
            broadcast_interval_ms: row.broadcast_interval_ms,
            default_settings: row.default_settings,
        });
        Ok(Self {
            id: row.id,
            definition,
            status: row.status.parse()?,
            participants: row.participants.into_iter().map(|p| p as u64).collect(),
            settings: row.settings,
            state: row.state.unwrap_or(Value::Null),
        })
    }
}

// PostgreSQL-backed instance store; the claim is a single conditional UPDATE.
#[derive(Clone)]
pub struct PostgresInstanceStore {
    pub db: PgPool,
}

impl PostgresInstanceStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InstanceStore for PostgresInstanceStore {
    async fn find(&self, status: InstanceStatus) -> Result<Vec<GameInstance>, String> {
        let query = format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM game_instances i
            JOIN game_definitions d ON d.id = i.definition_id
            WHERE i.status = $1
            ORDER BY i.created_at
            "#
        );
        let rows: Vec<InstanceRow> = sqlx::query_as(&query)
            .bind(status.as_str())
            .fetch_all(&self.db)
            .await
            .map_err(|e| e.to_string())?;

        rows.into_iter().map(GameInstance::try_from).collect()
    }

    async fn conditional_transition(
        &self,
        id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    ) -> Result<bool, String> {
        let result = sqlx::query(
            r#"
            UPDATE game_instances
            SET status = $3, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.db)
        .await
        .map_err(|e| e.to_string())?;

        Ok(result.rows_affected() == 1)
    }

    async fn write_final(
        &self,
        id: InstanceId,
        state: Value,
        status: InstanceStatus,
    ) -> Result<(), String> {
        let sources: Vec<&str> = [
            InstanceStatus::Starting,
            InstanceStatus::Ongoing,
        ]
        .into_iter()
        .filter(|from| from.can_transition(status))
        .map(InstanceStatus::as_str)
        .collect();

        let result = sqlx::query(
            r#"
            UPDATE game_instances
            SET status = $2, state = $3, updated_at = now()
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(state)
        .bind(&sources)
        .execute(&self.db)
        .await
        .map_err(|e| e.to_string())?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(format!("instance {id} is not in a state that can become {status}"))
        }
    }

    async fn get(&self, id: InstanceId) -> Result<Option<GameInstance>, String> {
        let query = format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM game_instances i
            JOIN game_definitions d ON d.id = i.definition_id
            WHERE i.id = $1
            "#
        );
        let row: Option<InstanceRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| e.to_string())?;

        row.map(GameInstance::try_from).transpose()
    }

    async fn definition(&self, id: &str) -> Result<Option<GameDefinition>, String> {
        let row: Option<DefinitionRow> = sqlx::query_as(
            r#"
            SELECT id, module_id, max_participants, tick_interval_ms,
                   broadcast_interval_ms, default_settings
            FROM game_definitions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| e.to_string())?;

        Ok(row.map(GameDefinition::from))
    }

    async fn create(&self, instance: GameInstance) -> Result<(), String> {
        let participants: Vec<i64> = instance.participants.iter().map(|p| *p as i64).collect();
        sqlx::query(
            r#"
            INSERT INTO game_instances (id, definition_id, status, participants, settings)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(instance.id)
        .bind(&instance.definition.id)
        .bind(instance.status.as_str())
        .bind(&participants)
        .bind(&instance.settings)
        .execute(&self.db)
        .await
        .map_err(|e| e.to_string())?;

        Ok(())
    }

    async fn update_settings(&self, id: InstanceId, settings: Value) -> Result<bool, String> {
        let result = sqlx::query(
            r#"
            UPDATE game_instances
            SET settings = $2, updated_at = now()
            WHERE id = $1 AND status = 'ready'
            "#,
        )
        .bind(id)
        .bind(settings)
        .execute(&self.db)
        .await
        .map_err(|e| e.to_string())?;

        Ok(result.rows_affected() == 1)
    }
}
