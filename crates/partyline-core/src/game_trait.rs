use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::game_registry::GameType;
use crate::player::ConnectionId;

/// Contract every mini-game engine implements.
///
/// The server owns at most one engine per room and only talks to it through
/// this trait. Engines run their own round clock once started and must
/// release it in [`GameEngine::destroy`].
pub trait GameEngine: Send + Sync {
    fn game_type(&self) -> GameType;

    /// Time spent in [`EnginePhase::Starting`] before the first round opens.
    fn warmup(&self) -> Duration;

    /// Begin the engine's state machine and timers.
    fn start(&mut self);

    /// Snapshot of the engine's current state.
    fn state(&self) -> EngineSnapshot;

    /// Stop timers and release engine-owned resources. Idempotent.
    fn destroy(&mut self);

    /// Rebind per-player bookkeeping from one connection id to another
    /// without resetting progress.
    fn migrate_player(&mut self, old_id: &str, new_id: &str);

    /// Overwrite a player's score, e.g. with a restored cumulative total.
    fn set_player_score(&mut self, player_id: &str, score: i64);

    /// Register a player who joined after the engine was built.
    fn add_player(&mut self, player_id: &str, name: &str);

    /// Apply a player's input. Returns false when the input was rejected
    /// (wrong phase, malformed, duplicate).
    fn apply_input(&mut self, player_id: &str, input: &serde_json::Value) -> bool;

    /// Host pause. Only honored while a round is open.
    fn pause(&mut self) -> bool;

    fn resume(&mut self) -> bool;

    /// Score events produced since the last call.
    fn drain_events(&mut self) -> Vec<GameEvent>;
}

/// Fine-grained engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Starting,
    Playing,
    RoundEnd,
    Paused,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub game_type: GameType,
    pub phase: EnginePhase,
    /// 1-based; 0 while starting.
    pub round: u32,
    pub total_rounds: u32,
    pub scores: HashMap<ConnectionId, i64>,
    /// Client-safe view of the current prompt (no answers).
    pub prompt: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    ScoreAwarded { player_id: ConnectionId, delta: i64 },
}

/// Phase durations for a round-based engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTiming {
    pub warmup: Duration,
    pub round: Duration,
    pub between_rounds: Duration,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(3),
            round: Duration::from_secs(20),
            between_rounds: Duration::from_secs(5),
        }
    }
}

/// Everything a factory needs to build an engine.
#[derive(Debug, Clone, Default)]
pub struct GameSetup {
    /// (connection id, display name) of the players taking part.
    pub players: Vec<(ConnectionId, String)>,
    /// Raw content rows; engines skip rows they cannot parse and fall back
    /// to built-in content when nothing usable remains.
    pub content: Vec<serde_json::Value>,
    pub timing: RoundTiming,
    /// Upper bound on rounds; 0 means "one per content item".
    pub max_rounds: u32,
}

/// Factory stored in the server's game registry. Plain `fn` items coerce
/// into it via `Box::new`.
pub type GameFactory = Box<dyn Fn(GameSetup) -> Box<dyn GameEngine> + Send + Sync>;
