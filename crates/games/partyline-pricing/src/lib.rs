pub mod catalog;
pub mod scoring;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use partyline_core::clock::{ENGINE_TICK, PhaseChange, RoundClock, Ticked, lock, spawn_ticker};
use partyline_core::game_registry::GameType;
use partyline_core::game_trait::{EnginePhase, EngineSnapshot, GameEngine, GameEvent, GameSetup};
use partyline_core::player::ConnectionId;
use partyline_core::score_table::ScoreTable;

pub use catalog::PricedItem;
use catalog::{builtin_items, parse_items};
use scoring::{CLOSEST_BONUS, proximity_points};

struct PricingRound {
    clock: RoundClock,
    items: Vec<PricedItem>,
    scores: ScoreTable,
    guesses: HashMap<ConnectionId, f64>,
}

impl PricingRound {
    fn item(&self, round: u32) -> Option<&PricedItem> {
        (round as usize)
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
    }

    fn on_change(&mut self, change: PhaseChange) {
        if change.from == EnginePhase::Playing {
            self.settle(change.round);
        }
        if change.to == EnginePhase::Playing {
            self.guesses.clear();
        }
    }

    /// Score every guess by proximity; the closest guess (ties included)
    /// earns a bonus.
    fn settle(&mut self, round: u32) {
        let Some(price) = self.item(round).map(|item| item.price) else {
            return;
        };
        let guesses = std::mem::take(&mut self.guesses);
        let best = guesses
            .values()
            .map(|g| (g - price).abs())
            .fold(f64::INFINITY, f64::min);
        for (id, guess) in guesses {
            let mut points = proximity_points(guess, price);
            if (guess - price).abs() == best && points > 0 {
                points += CLOSEST_BONUS;
            }
            self.scores.award(&id, points);
        }
    }

    fn prompt(&self) -> Option<serde_json::Value> {
        let item = self.item(self.clock.round())?;
        let mut prompt = json!({
            "index": self.clock.round(),
            "name": item.name,
            "description": item.description,
        });
        if matches!(
            self.clock.phase(),
            EnginePhase::RoundEnd | EnginePhase::Finished
        ) {
            prompt["price"] = json!(item.price);
        }
        Some(prompt)
    }
}

impl Ticked for PricingRound {
    fn tick(&mut self, dt: Duration) -> bool {
        if let Some(change) = self.clock.advance(dt) {
            self.on_change(change);
        }
        !self.clock.is_finished()
    }
}

/// Guess-the-price. Players submit one guess per item; closer guesses
/// score more.
pub struct PriceGuess {
    inner: Arc<Mutex<PricingRound>>,
    ticker: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl PriceGuess {
    pub fn new(setup: GameSetup) -> Self {
        let mut items = parse_items(&setup.content);
        if items.is_empty() {
            tracing::debug!("No usable pricing content, using built-in items");
            items = builtin_items();
        }
        if setup.max_rounds > 0 {
            items.truncate(setup.max_rounds as usize);
        }
        let mut scores = ScoreTable::default();
        for (id, name) in &setup.players {
            scores.join(id, name);
        }
        let clock = RoundClock::new(setup.timing, items.len() as u32);
        Self {
            inner: Arc::new(Mutex::new(PricingRound {
                clock,
                items,
                scores,
                guesses: HashMap::new(),
            })),
            ticker: None,
            destroyed: false,
        }
    }

    /// Advance the round clock manually.
    pub fn advance(&mut self, dt: Duration) {
        lock(&self.inner).tick(dt);
    }
}

pub fn create(setup: GameSetup) -> Box<dyn GameEngine> {
    Box::new(PriceGuess::new(setup))
}

impl GameEngine for PriceGuess {
    fn game_type(&self) -> GameType {
        GameType::PriceGuess
    }

    fn warmup(&self) -> Duration {
        lock(&self.inner).clock.timing().warmup
    }

    fn start(&mut self) {
        if !self.destroyed && self.ticker.is_none() {
            self.ticker = Some(spawn_ticker(Arc::clone(&self.inner), ENGINE_TICK));
        }
    }

    fn state(&self) -> EngineSnapshot {
        let inner = lock(&self.inner);
        EngineSnapshot {
            game_type: GameType::PriceGuess,
            phase: inner.clock.phase(),
            round: inner.clock.round(),
            total_rounds: inner.clock.total_rounds(),
            scores: inner.scores.snapshot(),
            prompt: inner.prompt(),
        }
    }

    fn destroy(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        lock(&self.inner).clock.finish();
        self.destroyed = true;
    }

    fn migrate_player(&mut self, old_id: &str, new_id: &str) {
        let mut inner = lock(&self.inner);
        inner.scores.migrate(old_id, new_id);
        if let Some(guess) = inner.guesses.remove(old_id) {
            inner.guesses.insert(new_id.to_string(), guess);
        }
    }

    fn set_player_score(&mut self, player_id: &str, score: i64) {
        lock(&self.inner).scores.set(player_id, score);
    }

    fn add_player(&mut self, player_id: &str, name: &str) {
        lock(&self.inner).scores.join(player_id, name);
    }

    fn apply_input(&mut self, player_id: &str, input: &serde_json::Value) -> bool {
        let mut inner = lock(&self.inner);
        if inner.clock.phase() != EnginePhase::Playing
            || !inner.scores.contains(player_id)
            || inner.guesses.contains_key(player_id)
        {
            return false;
        }
        let Some(guess) = input
            .get("guess")
            .and_then(serde_json::Value::as_f64)
            .filter(|g| g.is_finite() && *g >= 0.0)
        else {
            return false;
        };
        inner.guesses.insert(player_id.to_string(), guess);
        if inner.guesses.len() == inner.scores.len()
            && let Some(change) = inner.clock.end_round_early()
        {
            inner.on_change(change);
        }
        true
    }

    fn pause(&mut self) -> bool {
        lock(&self.inner).clock.pause()
    }

    fn resume(&mut self) -> bool {
        lock(&self.inner).clock.resume()
    }

    fn drain_events(&mut self) -> Vec<GameEvent> {
        lock(&self.inner).scores.drain_events()
    }
}

impl Drop for PriceGuess {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}
