// Tower defense: hold off waves of enemies with placed towers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{setting_f64, setting_i64, setting_u64};
use crate::domain::broadcast::{Element, GameStateSnapshot, Position};
use crate::domain::errors::{FaultPhase, ModuleFault};
use crate::domain::input::{InputEvent, InputPayload};
use crate::domain::instance::{ParticipantId, Settings};
use crate::domain::module::{GameModule, GameState, StateDescription};

pub const MODULE_ID: &str = "tower_defense";

// Enemy speeds are tuned per 100ms step.
const REFERENCE_STEP_SECS: f32 = 0.1;
const PATH_END_X: f32 = 800.0;
const SPAWN_MIN_Y: f32 = 50.0;
const SPAWN_MAX_Y: f32 = 450.0;
const MAX_WAVES_LIMIT: u32 = 1_000;
const PER_WAVE_ENEMIES_LIMIT: u32 = 500;

#[derive(Debug, Clone, Copy)]
pub struct TowerDefenseTuning {
    pub initial_lives: i64,
    pub initial_money: i64,
    /// Seconds between waves.
    pub wave_interval: f64,
    pub max_waves: u32,
    pub per_wave_enemies: u32,
    pub tower_cost: i64,
    pub tower_damage: f32,
    pub tower_range: f32,
}

impl Default for TowerDefenseTuning {
    fn default() -> Self {
        Self {
            initial_lives: 20,
            initial_money: 100,
            wave_interval: 30.0,
            max_waves: 10,
            per_wave_enemies: 5,
            tower_cost: 50,
            tower_damage: 10.0,
            tower_range: 100.0,
        }
    }
}

impl TowerDefenseTuning {
    pub fn from_settings(settings: &Settings) -> Result<Self, ModuleFault> {
        let defaults = Self::default();
        let tuning = Self {
            initial_lives: setting_i64(
                settings,
                &["initial_lives", "starting_lives"],
                defaults.initial_lives,
            ),
            initial_money: setting_i64(
                settings,
                &["initial_money", "starting_money"],
                defaults.initial_money,
            ),
            wave_interval: setting_f64(settings, &["wave_interval"], defaults.wave_interval),
            max_waves: bounded_count(
                settings,
                "max_waves",
                defaults.max_waves,
                MAX_WAVES_LIMIT,
            )?,
            per_wave_enemies: bounded_count(
                settings,
                "per_wave_enemies",
                defaults.per_wave_enemies,
                PER_WAVE_ENEMIES_LIMIT,
            )?,
            tower_cost: setting_i64(settings, &["tower_cost"], defaults.tower_cost),
            tower_damage: setting_f64(settings, &["tower_damage"], defaults.tower_damage as f64)
                as f32,
            tower_range: setting_f64(settings, &["tower_range"], defaults.tower_range as f64)
                as f32,
        };

        if !tuning.wave_interval.is_finite() || tuning.wave_interval <= 0.0 {
            return Err(ModuleFault::new(
                FaultPhase::Initialize,
                "wave_interval must be a positive number of seconds",
            ));
        }
        if tuning.initial_lives <= 0 {
            return Err(ModuleFault::new(
                FaultPhase::Initialize,
                "initial_lives must be positive",
            ));
        }
        Ok(tuning)
    }
}

fn bounded_count(
    settings: &Settings,
    key: &str,
    default: u32,
    limit: u32,
) -> Result<u32, ModuleFault> {
    let raw = setting_u64(settings, &[key], u64::from(default));
    u32::try_from(raw)
        .ok()
        .filter(|value| *value <= limit)
        .ok_or_else(|| {
            ModuleFault::new(
                FaultPhase::Initialize,
                format!("{key} must be at most {limit}, got {raw}"),
            )
        })
}

pub struct TowerDefense;

impl GameModule for TowerDefense {
    fn module_id(&self) -> &'static str {
        MODULE_ID
    }

    fn initialize(
        &self,
        settings: &Settings,
        participants: &[ParticipantId],
    ) -> Result<Box<dyn GameState>, ModuleFault> {
        let tuning = TowerDefenseTuning::from_settings(settings)?;
        let seed = settings
            .get("seed")
            .and_then(Value::as_u64)
            .unwrap_or_else(rand::random);

        Ok(Box::new(TowerDefenseState {
            tuning,
            participants: participants.to_vec(),
            rng: StdRng::seed_from_u64(seed),
            status: Status::Active,
            lives: tuning.initial_lives,
            money: tuning.initial_money,
            score: 0,
            wave: 0,
            wave_timer: 0.0,
            enemies: Vec::new(),
            towers: Vec::new(),
            next_tower_id: 1,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Won,
    Lost,
    Stopped,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Won => "won",
            Status::Lost => "lost",
            Status::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
struct Enemy {
    id: String,
    x: f32,
    y: f32,
    health: f32,
    speed: f32,
    value: i64,
}

#[derive(Debug, Clone)]
struct Tower {
    id: String,
    owner: ParticipantId,
    x: f32,
    y: f32,
    damage: f32,
    range: f32,
}

struct TowerDefenseState {
    tuning: TowerDefenseTuning,
    participants: Vec<ParticipantId>,
    rng: StdRng,
    status: Status,
    lives: i64,
    money: i64,
    score: i64,
    wave: u32,
    wave_timer: f64,
    enemies: Vec<Enemy>,
    towers: Vec<Tower>,
    next_tower_id: u64,
}

impl TowerDefenseState {
    fn place_tower(&mut self, owner: ParticipantId, data: &Value) {
        let (Some(x), Some(y)) = (
            data.get("x").and_then(Value::as_f64),
            data.get("y").and_then(Value::as_f64),
        ) else {
            debug!(owner, "place_tower without coordinates ignored");
            return;
        };
        if self.money < self.tuning.tower_cost {
            debug!(owner, money = self.money, "not enough money for tower");
            return;
        }

        self.money -= self.tuning.tower_cost;
        self.towers.push(Tower {
            id: format!("tower_{}", self.next_tower_id),
            owner,
            x: x as f32,
            y: y as f32,
            damage: self.tuning.tower_damage,
            range: self.tuning.tower_range,
        });
        self.next_tower_id += 1;
    }

    fn start_new_wave(&mut self) {
        self.wave += 1;
        if self.wave > self.tuning.max_waves {
            return;
        }
        info!(wave = self.wave, "starting wave");

        let wave = self.wave as f32;
        let count = self
            .tuning
            .per_wave_enemies
            .saturating_add(self.wave.saturating_mul(2));
        for i in 0..count {
            self.enemies.push(Enemy {
                id: format!("enemy_{}_{}", self.wave, i),
                x: 0.0,
                y: self.rng.gen_range(SPAWN_MIN_Y..=SPAWN_MAX_Y),
                health: 50.0 + wave * 10.0,
                speed: 2.0 + wave * 0.2,
                value: 10 + self.wave as i64,
            });
        }
    }

    fn move_enemies(&mut self, step_scale: f32) {
        let before = self.enemies.len();
        for enemy in &mut self.enemies {
            enemy.x += enemy.speed * step_scale;
        }
        self.enemies.retain(|enemy| enemy.x <= PATH_END_X);
        self.lives -= (before - self.enemies.len()) as i64;
    }

    fn tower_attacks(&mut self, step_scale: f32) {
        for tower in &self.towers {
            let range_sq = tower.range * tower.range;
            let target = self
                .enemies
                .iter()
                .enumerate()
                .map(|(index, enemy)| {
                    let dx = tower.x - enemy.x;
                    let dy = tower.y - enemy.y;
                    (index, dx * dx + dy * dy)
                })
                .filter(|(_, dist_sq)| *dist_sq <= range_sq)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(index, _)| index);

            let Some(index) = target else {
                continue;
            };
            self.enemies[index].health -= tower.damage * step_scale;
            if self.enemies[index].health <= 0.0 {
                let defeated = self.enemies.swap_remove(index);
                self.money += defeated.value;
                self.score += defeated.value;
            }
        }
    }

    fn check_end_conditions(&mut self) {
        if self.lives <= 0 {
            self.lives = 0;
            self.status = Status::Lost;
            info!("game lost; no lives remaining");
        } else if self.wave >= self.tuning.max_waves && self.enemies.is_empty() {
            self.status = Status::Won;
            info!(waves = self.tuning.max_waves, "game won; all waves cleared");
        }
    }

    fn elements(&self) -> Vec<Element> {
        let towers = self.towers.iter().map(|tower| Element {
            id: tower.id.clone(),
            kind: "tower".to_string(),
            position: Position {
                x: tower.x,
                y: tower.y,
            },
            state: "active".to_string(),
            properties: json!({
                "owner": tower.owner,
                "damage": tower.damage,
                "range": tower.range,
            }),
        });
        let enemies = self.enemies.iter().map(|enemy| Element {
            id: enemy.id.clone(),
            kind: "enemy".to_string(),
            position: Position {
                x: enemy.x,
                y: enemy.y,
            },
            state: "active".to_string(),
            properties: json!({
                "health": enemy.health,
                "speed": enemy.speed,
                "value": enemy.value,
            }),
        });
        towers.chain(enemies).collect()
    }
}

impl GameState for TowerDefenseState {
    fn handle_input(&mut self, events: &[InputEvent]) -> Result<(), ModuleFault> {
        for event in events {
            match &event.payload {
                InputPayload::Stop => {
                    self.status = Status::Stopped;
                }
                InputPayload::Action { name, data } if name == "place_tower" => {
                    if self.status == Status::Active {
                        self.place_tower(event.participant, data);
                    }
                }
                // Held keys and pointer moves have no meaning in this game.
                _ => {}
            }
        }
        Ok(())
    }

    fn tick(&mut self, dt: Duration) -> Result<(), ModuleFault> {
        if self.status != Status::Active {
            return Ok(());
        }

        let step_scale = dt.as_secs_f32() / REFERENCE_STEP_SECS;
        self.wave_timer += dt.as_secs_f64();
        if self.wave_timer >= self.tuning.wave_interval {
            self.wave_timer = 0.0;
            self.start_new_wave();
        }

        self.move_enemies(step_scale);
        self.tower_attacks(step_scale);
        self.check_end_conditions();
        Ok(())
    }

    fn describe_state(&self) -> Result<StateDescription, ModuleFault> {
        let resources = BTreeMap::from([
            ("lives".to_string(), self.lives),
            ("money".to_string(), self.money),
            ("score".to_string(), self.score),
        ]);
        Ok(StateDescription {
            snapshot: GameStateSnapshot {
                status: self.status.as_str().to_string(),
                resources,
                progress: self.wave,
                time_remaining: Some((self.tuning.wave_interval - self.wave_timer).max(0.0)),
            },
            elements: self.elements(),
            terminal: self.status != Status::Active,
        })
    }

    fn export_state(&self) -> Result<Value, ModuleFault> {
        Ok(json!({
            "status": self.status.as_str(),
            "participants": self.participants,
            "lives": self.lives,
            "money": self.money,
            "score": self.score,
            "wave": self.wave,
            "towers": self.towers.len(),
            "enemies": self.enemies.len(),
        }))
    }
}
