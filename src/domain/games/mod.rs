// Built-in game modules and the definitions that reference them.

pub mod bong;
pub mod tower_defense;

use serde_json::{Value, json};
use std::time::Duration;

use crate::domain::instance::{GameDefinition, Settings};

pub use bong::Bong;
pub use tower_defense::TowerDefense;

/// Definitions shipped with the engine, mirrored by the initial migration.
pub fn builtin_definitions() -> Vec<GameDefinition> {
    vec![
        GameDefinition {
            id: "TowerDefense".to_string(),
            module_id: tower_defense::MODULE_ID.to_string(),
            max_participants: 4,
            tick_interval: Duration::from_millis(100),
            broadcast_interval: Duration::from_millis(1000),
            default_settings: json!({
                "initial_money": 1000,
                "initial_lives": 20,
                "per_wave_enemies": 5,
                "max_waves": 10,
                "wave_interval": 30,
                "tower_cost": 50
            }),
        },
        GameDefinition {
            id: "Bong".to_string(),
            module_id: bong::MODULE_ID.to_string(),
            max_participants: 2,
            tick_interval: Duration::from_millis(50),
            broadcast_interval: Duration::from_millis(200),
            default_settings: json!({ "hits_to_win": 10 }),
        },
    ]
}

// Settings lookups accept a list of aliases; the first present key wins.

pub(crate) fn setting_f64(settings: &Settings, keys: &[&str], default: f64) -> f64 {
    lookup(settings, keys)
        .and_then(Value::as_f64)
        .unwrap_or(default)
}

pub(crate) fn setting_i64(settings: &Settings, keys: &[&str], default: i64) -> i64 {
    lookup(settings, keys)
        .and_then(Value::as_i64)
        .unwrap_or(default)
}

pub(crate) fn setting_u64(settings: &Settings, keys: &[&str], default: u64) -> u64 {
    lookup(settings, keys)
        .and_then(Value::as_u64)
        .unwrap_or(default)
}

fn lookup<'a>(settings: &'a Settings, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| settings.get(*key))
}
