// Bong: a two-paddle take on pong. Each paddle return counts as a hit.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{setting_f64, setting_u64};
use crate::domain::broadcast::{Element, GameStateSnapshot, Position};
use crate::domain::errors::{FaultPhase, ModuleFault};
use crate::domain::input::{InputEvent, InputPayload};
use crate::domain::instance::{ParticipantId, Settings};
use crate::domain::module::{GameModule, GameState, StateDescription};

pub const MODULE_ID: &str = "bong";

const FIELD_WIDTH: f32 = 800.0;
const FIELD_HEIGHT: f32 = 400.0;
const PADDLE_INSET: f32 = 20.0;
const PADDLE_HEIGHT: f32 = 80.0;

#[derive(Debug, Clone, Copy)]
pub struct BongTuning {
    pub hits_to_win: u32,
    /// Pixels per second.
    pub paddle_speed: f32,
    pub ball_speed: f32,
}

impl Default for BongTuning {
    fn default() -> Self {
        Self {
            hits_to_win: 10,
            paddle_speed: 300.0,
            ball_speed: 250.0,
        }
    }
}

impl BongTuning {
    pub fn from_settings(settings: &Settings) -> Result<Self, ModuleFault> {
        let defaults = Self::default();
        let tuning = Self {
            hits_to_win: setting_u64(settings, &["hits_to_win"], defaults.hits_to_win as u64)
                as u32,
            paddle_speed: setting_f64(settings, &["paddle_speed"], defaults.paddle_speed as f64)
                as f32,
            ball_speed: setting_f64(settings, &["ball_speed"], defaults.ball_speed as f64) as f32,
        };
        if tuning.hits_to_win == 0 {
            return Err(ModuleFault::new(
                FaultPhase::Initialize,
                "hits_to_win must be at least 1",
            ));
        }
        Ok(tuning)
    }
}

pub struct Bong;

impl GameModule for Bong {
    fn module_id(&self) -> &'static str {
        MODULE_ID
    }

    fn initialize(
        &self,
        settings: &Settings,
        participants: &[ParticipantId],
    ) -> Result<Box<dyn GameState>, ModuleFault> {
        let tuning = BongTuning::from_settings(settings)?;
        let mut state = BongState {
            tuning,
            participants: participants.to_vec(),
            paddles: [Paddle::default(), Paddle::default()],
            ball: Ball::default(),
            hits: [0, 0],
            winner: None,
            stopped: false,
        };
        state.serve(1.0);
        Ok(Box::new(state))
    }
}

#[derive(Debug, Clone, Copy)]
struct Paddle {
    y: f32,
    direction: f32,
    target: Option<f32>,
}

impl Default for Paddle {
    fn default() -> Self {
        Self {
            y: FIELD_HEIGHT / 2.0,
            direction: 0.0,
            target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Ball {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
}

struct BongState {
    tuning: BongTuning,
    participants: Vec<ParticipantId>,
    /// Index 0 is the left paddle, 1 the right.
    paddles: [Paddle; 2],
    ball: Ball,
    hits: [u32; 2],
    winner: Option<usize>,
    stopped: bool,
}

impl BongState {
    fn side_of(&self, participant: ParticipantId) -> Option<usize> {
        self.participants
            .iter()
            .take(2)
            .position(|p| *p == participant)
    }

    fn serve(&mut self, toward: f32) {
        self.ball = Ball {
            x: FIELD_WIDTH / 2.0,
            y: FIELD_HEIGHT / 2.0,
            vx: self.tuning.ball_speed * toward.signum(),
            vy: self.tuning.ball_speed * 0.5,
        };
    }

    fn is_over(&self) -> bool {
        self.stopped || self.winner.is_some()
    }

    fn move_paddles(&mut self, dt: f32) {
        let max_step = self.tuning.paddle_speed * dt;
        for paddle in &mut self.paddles {
            let step = match paddle.target {
                Some(target) => (target - paddle.y).clamp(-max_step, max_step),
                None => paddle.direction * max_step,
            };
            paddle.y = (paddle.y + step)
                .clamp(PADDLE_HEIGHT / 2.0, FIELD_HEIGHT - PADDLE_HEIGHT / 2.0);
        }
    }

    fn covers(&self, side: usize, y: f32) -> bool {
        (self.paddles[side].y - y).abs() <= PADDLE_HEIGHT / 2.0
    }

    fn move_ball(&mut self, dt: f32) {
        self.ball.x += self.ball.vx * dt;
        self.ball.y += self.ball.vy * dt;

        if self.ball.y <= 0.0 || self.ball.y >= FIELD_HEIGHT {
            self.ball.y = self.ball.y.clamp(0.0, FIELD_HEIGHT);
            self.ball.vy = -self.ball.vy;
        }

        let (side, paddle_x) = if self.ball.vx < 0.0 {
            (0, PADDLE_INSET)
        } else {
            (1, FIELD_WIDTH - PADDLE_INSET)
        };
        let reached = if side == 0 {
            self.ball.x <= paddle_x
        } else {
            self.ball.x >= paddle_x
        };
        if !reached {
            return;
        }

        if self.covers(side, self.ball.y) {
            self.ball.x = paddle_x;
            self.ball.vx = -self.ball.vx;
            self.hits[side] += 1;
            if self.hits[side] >= self.tuning.hits_to_win {
                self.winner = Some(side);
            }
        } else if self.ball.x < 0.0 || self.ball.x > FIELD_WIDTH {
            // Missed: serve toward the side that let it through.
            let toward = if side == 0 { -1.0 } else { 1.0 };
            self.serve(toward);
        }
    }
}

impl GameState for BongState {
    fn handle_input(&mut self, events: &[InputEvent]) -> Result<(), ModuleFault> {
        for event in events {
            if event.payload.is_stop() {
                self.stopped = true;
                continue;
            }
            let Some(side) = self.side_of(event.participant) else {
                continue;
            };
            let paddle = &mut self.paddles[side];
            match &event.payload {
                InputPayload::HeldKeys { keys } => {
                    let up = keys.iter().any(|k| k == "up");
                    let down = keys.iter().any(|k| k == "down");
                    paddle.direction = match (up, down) {
                        (true, false) => -1.0,
                        (false, true) => 1.0,
                        _ => 0.0,
                    };
                    paddle.target = None;
                }
                InputPayload::Pointer { y, .. } if y.is_finite() => {
                    paddle.target = Some(*y);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn tick(&mut self, dt: Duration) -> Result<(), ModuleFault> {
        if self.is_over() {
            return Ok(());
        }
        let dt = dt.as_secs_f32();
        self.move_paddles(dt);
        self.move_ball(dt);
        Ok(())
    }

    fn describe_state(&self) -> Result<StateDescription, ModuleFault> {
        let status = match (self.stopped, self.winner) {
            (true, _) => "stopped",
            (false, Some(_)) => "won",
            (false, None) => "active",
        };
        let resources = BTreeMap::from([
            ("hits_left".to_string(), self.hits[0] as i64),
            ("hits_right".to_string(), self.hits[1] as i64),
        ]);

        let mut elements: Vec<Element> = self
            .paddles
            .iter()
            .enumerate()
            .map(|(side, paddle)| Element {
                id: if side == 0 { "paddle_left" } else { "paddle_right" }.to_string(),
                kind: "paddle".to_string(),
                position: Position {
                    x: if side == 0 {
                        PADDLE_INSET
                    } else {
                        FIELD_WIDTH - PADDLE_INSET
                    },
                    y: paddle.y,
                },
                state: "active".to_string(),
                properties: json!({
                    "height": PADDLE_HEIGHT,
                    "owner": self.participants.get(side),
                }),
            })
            .collect();
        elements.push(Element {
            id: "ball".to_string(),
            kind: "ball".to_string(),
            position: Position {
                x: self.ball.x,
                y: self.ball.y,
            },
            state: "active".to_string(),
            properties: json!({ "vx": self.ball.vx, "vy": self.ball.vy }),
        });

        Ok(StateDescription {
            snapshot: GameStateSnapshot {
                status: status.to_string(),
                resources,
                progress: self.hits[0].max(self.hits[1]),
                time_remaining: None,
            },
            elements,
            terminal: self.is_over(),
        })
    }

    fn export_state(&self) -> Result<Value, ModuleFault> {
        Ok(json!({
            "participants": self.participants,
            "hits": self.hits,
            "winner": self.winner.and_then(|side| self.participants.get(side)),
            "stopped": self.stopped,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn keys(participant: ParticipantId, seq: u64, held: &[&str]) -> InputEvent {
        InputEvent {
            instance_id: Uuid::nil(),
            participant,
            seq,
            payload: InputPayload::HeldKeys {
                keys: held.iter().map(|k| k.to_string()).collect(),
            },
        }
    }

    fn element_y(description: &StateDescription, id: &str) -> f32 {
        description
            .elements
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.position.y)
            .expect("element should be listed")
    }

    #[test]
    fn when_up_is_held_then_only_that_participants_paddle_moves() {
        let mut state = Bong.initialize(&json!({}), &[10, 20]).unwrap();

        state.handle_input(&[keys(10, 1, &["up"])]).unwrap();
        state.tick(Duration::from_millis(100)).unwrap();
        let description = state.describe_state().unwrap();

        assert!(element_y(&description, "paddle_left") < FIELD_HEIGHT / 2.0);
        assert_eq!(element_y(&description, "paddle_right"), FIELD_HEIGHT / 2.0);
    }

    #[test]
    fn when_paddles_cover_the_ball_then_hits_accumulate_until_a_win() {
        let mut state = Bong
            .initialize(&json!({"hits_to_win": 1, "ball_speed": 400}), &[10, 20])
            .unwrap();

        // The serve travels toward the right paddle, which tracks the ball.
        let mut ticks = 0;
        while !state.describe_state().unwrap().terminal && ticks < 1_000 {
            let ball_y = element_y(&state.describe_state().unwrap(), "ball");
            state
                .handle_input(&[InputEvent {
                    instance_id: Uuid::nil(),
                    participant: 20,
                    seq: ticks,
                    payload: InputPayload::Pointer { x: 0.0, y: ball_y },
                }])
                .unwrap();
            state.tick(Duration::from_millis(10)).unwrap();
            ticks += 1;
        }
        let description = state.describe_state().unwrap();

        assert!(description.terminal);
        assert_eq!(description.snapshot.status, "won");
        assert_eq!(description.snapshot.resources["hits_right"], 1);
    }

    #[test]
    fn when_hits_to_win_is_zero_then_initialize_fails() {
        assert!(Bong.initialize(&json!({"hits_to_win": 0}), &[1, 2]).is_err());
    }
}
